//! Modification context: the staging area for entry and template writes.
//!
//! A context collects, per touched domain entity, the entries to create and
//! the entries to delete, plus a global set of entry templates to delete.
//! Staging is purely in memory. The owning [`AclOperation`] flushes the
//! context in one pass that locks every touched node in ascending id order.
//!
//! [`AclOperation`]: crate::service::AclOperation

use std::collections::{BTreeMap, BTreeSet};

use racl_storage::{AclEntry, NewAclEntry};

/// Staged changes for a single domain entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclModification {
    entries_to_create: Vec<NewAclEntry>,
    entries_to_delete: BTreeMap<i64, AclEntry>,
}

impl AclModification {
    /// Entries that will be inserted at flush, in staging order.
    pub fn entries_to_create(&self) -> &[NewAclEntry] {
        &self.entries_to_create
    }

    /// Entries that will be removed at flush.
    pub fn entries_to_delete(&self) -> impl Iterator<Item = &AclEntry> {
        self.entries_to_delete.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries_to_create.is_empty() && self.entries_to_delete.is_empty()
    }
}

/// Per-operation batch of staged entry and template changes.
///
/// Keyed by domain entity id; iteration order is ascending id, which is the
/// order flush locks nodes in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclModificationContext {
    modifications: BTreeMap<i64, AclModification>,
    entry_templates_to_delete: BTreeSet<i64>,
}

impl AclModificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an entry for creation under its domain entity.
    pub fn stage_entry_creation(&mut self, entry: NewAclEntry) {
        self.modifications
            .entry(entry.domain_entity_id)
            .or_default()
            .entries_to_create
            .push(entry);
    }

    /// Stages an existing entry for deletion under its domain entity.
    ///
    /// Staging the same entry twice has no further effect.
    pub fn stage_entry_deletion(&mut self, entry: AclEntry) {
        self.modifications
            .entry(entry.domain_entity_id)
            .or_default()
            .entries_to_delete
            .insert(entry.id, entry);
    }

    /// Stages an entry template (and, at flush, every entry derived from it) for deletion.
    pub fn stage_entry_template_deletion(&mut self, template_id: i64) {
        self.entry_templates_to_delete.insert(template_id);
    }

    /// Touched domain entity ids in ascending order.
    pub fn domain_entity_ids(&self) -> Vec<i64> {
        self.modifications.keys().copied().collect()
    }

    pub fn modification(&self, domain_entity_id: i64) -> Option<&AclModification> {
        self.modifications.get(&domain_entity_id)
    }

    /// Staged changes per domain entity, ascending by id.
    pub fn modifications(&self) -> impl Iterator<Item = (i64, &AclModification)> {
        self.modifications.iter().map(|(id, m)| (*id, m))
    }

    pub fn entry_templates_to_delete(&self) -> impl Iterator<Item = i64> + '_ {
        self.entry_templates_to_delete.iter().copied()
    }

    /// Number of entries staged for creation across all nodes.
    pub fn created_count(&self) -> usize {
        self.modifications
            .values()
            .map(|m| m.entries_to_create.len())
            .sum()
    }

    /// Number of entries staged for deletion across all nodes.
    pub fn deleted_count(&self) -> usize {
        self.modifications
            .values()
            .map(|m| m.entries_to_delete.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_templates_to_delete.is_empty() && self.modifications.values().all(|m| m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(domain_entity_id: i64, sid_id: i64) -> NewAclEntry {
        NewAclEntry {
            domain_entity_id,
            sid_id,
            permission_id: 1,
            granting: true,
            entry_template_id: 10,
        }
    }

    fn entry(id: i64, domain_entity_id: i64) -> AclEntry {
        AclEntry {
            id,
            domain_entity_id,
            sid_id: 5,
            permission_id: 1,
            granting: true,
            entry_template_id: 10,
        }
    }

    #[test]
    fn test_new_context_is_empty() {
        let ctx = AclModificationContext::new();
        assert!(ctx.is_empty());
        assert!(ctx.domain_entity_ids().is_empty());
    }

    #[test]
    fn test_staging_groups_by_domain_entity_in_ascending_order() {
        let mut ctx = AclModificationContext::new();
        ctx.stage_entry_creation(new_entry(30, 1));
        ctx.stage_entry_creation(new_entry(10, 1));
        ctx.stage_entry_deletion(entry(100, 20));
        ctx.stage_entry_creation(new_entry(30, 2));

        assert_eq!(ctx.domain_entity_ids(), vec![10, 20, 30]);
        assert_eq!(ctx.created_count(), 3);
        assert_eq!(ctx.deleted_count(), 1);
        assert_eq!(
            ctx.modification(30).map(|m| m.entries_to_create().len()),
            Some(2)
        );
    }

    #[test]
    fn test_duplicate_deletion_is_collapsed() {
        let mut ctx = AclModificationContext::new();
        ctx.stage_entry_deletion(entry(100, 20));
        ctx.stage_entry_deletion(entry(100, 20));

        assert_eq!(ctx.deleted_count(), 1);
    }

    #[test]
    fn test_template_deletion_alone_makes_context_non_empty() {
        let mut ctx = AclModificationContext::new();
        ctx.stage_entry_template_deletion(7);
        ctx.stage_entry_template_deletion(7);

        assert!(!ctx.is_empty());
        assert!(ctx.domain_entity_ids().is_empty());
        assert_eq!(ctx.entry_templates_to_delete().collect::<Vec<_>>(), vec![7]);
    }
}
