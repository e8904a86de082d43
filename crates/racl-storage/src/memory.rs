//! In-memory storage implementation.
//!
//! All tables live behind one `parking_lot::RwLock` that is only ever held for
//! the duration of a single synchronous read or write. Row locks are separate
//! `tokio` mutexes keyed by [`RowKey`], so a transaction can wait for a row
//! without blocking the executor. A row's mutex is dropped from the map once
//! the last holder releases it with no waiters left.
//!
//! Writes are applied immediately and recorded in an undo log. Rolling back
//! (explicitly or by dropping the transaction) replays the log in reverse
//! before the transaction's row locks are released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, trace};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    AclDomainEntity, AclDomainEntityClass, AclEntry, AclEntryTemplate, AclPermission, AclSid,
    AclStore, NewAclDomainEntity, NewAclEntry, NewAclEntryTemplate, StoreTransaction,
};

/// Identity of a lockable row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Sid(i64),
    Class(i64),
    DomainEntity(i64),
    Account(String),
}

#[derive(Debug, Default)]
struct Tables {
    sids: HashMap<i64, AclSid>,
    classes: HashMap<i64, AclDomainEntityClass>,
    domain_entities: HashMap<i64, AclDomainEntity>,
    permissions: HashMap<i64, AclPermission>,
    templates: HashMap<i64, AclEntryTemplate>,
    entries: HashMap<i64, AclEntry>,
    accounts: HashSet<String>,
}

/// Previous state of a row, restored on rollback.
#[derive(Debug)]
enum Undo {
    Sid(i64, Option<AclSid>),
    Class(i64, Option<AclDomainEntityClass>),
    DomainEntity(i64, Option<AclDomainEntity>),
    Permission(i64, Option<AclPermission>),
    Template(i64, Option<AclEntryTemplate>),
    Entry(i64, Option<AclEntry>),
}

fn restore<T>(table: &mut HashMap<i64, T>, id: i64, previous: Option<T>) {
    match previous {
        Some(row) => {
            table.insert(id, row);
        }
        None => {
            table.remove(&id);
        }
    }
}

impl Tables {
    fn apply_undo(&mut self, undo: Undo) {
        match undo {
            Undo::Sid(id, previous) => restore(&mut self.sids, id, previous),
            Undo::Class(id, previous) => restore(&mut self.classes, id, previous),
            Undo::DomainEntity(id, previous) => restore(&mut self.domain_entities, id, previous),
            Undo::Permission(id, previous) => restore(&mut self.permissions, id, previous),
            Undo::Template(id, previous) => restore(&mut self.templates, id, previous),
            Undo::Entry(id, previous) => restore(&mut self.entries, id, previous),
        }
    }

    fn find_sid(&self, sid: &str, principal: bool) -> Option<&AclSid> {
        self.sids
            .values()
            .find(|s| s.sid == sid && s.principal == principal)
    }

    fn find_class(&self, class_name: &str) -> Option<&AclDomainEntityClass> {
        self.classes.values().find(|c| c.class_name == class_name)
    }

    fn find_domain_entity(&self, class_name: &str, entity_id: i64) -> Option<&AclDomainEntity> {
        let class = self.find_class(class_name)?;
        self.domain_entities
            .values()
            .find(|d| d.class_id == class.id && d.entity_id == entity_id)
    }

    fn find_permission(&self, name: &str) -> Option<&AclPermission> {
        self.permissions.values().find(|p| p.name == name)
    }

    /// Union of the masks granted to `sid_id` directly on `domain_entity_id`.
    fn granted_mask(&self, domain_entity_id: i64, sid_id: i64) -> u32 {
        self.entries
            .values()
            .filter(|e| e.domain_entity_id == domain_entity_id && e.sid_id == sid_id && e.granting)
            .filter_map(|e| self.permissions.get(&e.permission_id))
            .fold(0, |acc, p| acc | p.mask)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: RwLock<Tables>,
    row_locks: DashMap<RowKey, Arc<Mutex<()>>>,
    sequence: AtomicI64,
    permission_queries: AtomicU64,
}

impl MemoryState {
    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-memory implementation of [`AclStore`].
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryAclStore {
    state: Arc<MemoryState>,
}

impl MemoryAclStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seeds the rows every ACL store must contain: the system administrator
    /// SID, the root class and the root domain entity owned by the administrator.
    ///
    /// Calling it again with the same arguments is a no-op.
    pub fn bootstrap(
        &self,
        system_administrator: &str,
        root_class: &str,
        root_entity_id: i64,
    ) -> AclDomainEntity {
        let mut tables = self.state.tables.write();

        let admin_id = match tables.find_sid(system_administrator, true) {
            Some(sid) => sid.id,
            None => {
                let id = self.state.next_id();
                tables.sids.insert(
                    id,
                    AclSid {
                        id,
                        sid: system_administrator.to_string(),
                        principal: true,
                    },
                );
                id
            }
        };
        tables.accounts.insert(system_administrator.to_string());

        let class_id = match tables.find_class(root_class) {
            Some(class) => class.id,
            None => {
                let id = self.state.next_id();
                tables.classes.insert(
                    id,
                    AclDomainEntityClass {
                        id,
                        class_name: root_class.to_string(),
                    },
                );
                id
            }
        };

        if let Some(root) = tables.find_domain_entity(root_class, root_entity_id) {
            return root.clone();
        }

        let id = self.state.next_id();
        let root = AclDomainEntity {
            id,
            class_id,
            entity_id: root_entity_id,
            parent_id: None,
            owner_sid_id: admin_id,
            entries_inheriting: true,
        };
        tables.domain_entities.insert(id, root.clone());
        debug!(root_id = id, "bootstrapped in-memory ACL store");
        root
    }

    /// Registers a user account that can later be locked by grant/revoke operations.
    pub fn add_user_account(&self, user_id: &str) {
        self.state.tables.write().accounts.insert(user_id.to_string());
    }

    /// Inserts (or returns the existing) permission with the given name.
    pub fn add_permission(&self, name: &str, mask: u32) -> AclPermission {
        let mut tables = self.state.tables.write();
        if let Some(existing) = tables.find_permission(name) {
            return existing.clone();
        }
        let id = self.state.next_id();
        let permission = AclPermission {
            id,
            name: name.to_string(),
            mask,
        };
        tables.permissions.insert(id, permission.clone());
        permission
    }

    /// Number of SID rows with the given external identifier.
    pub fn sid_count(&self, sid: &str) -> usize {
        self.state
            .tables
            .read()
            .sids
            .values()
            .filter(|s| s.sid == sid)
            .count()
    }

    /// Number of class rows with the given name.
    pub fn class_count(&self, class_name: &str) -> usize {
        self.state
            .tables
            .read()
            .classes
            .values()
            .filter(|c| c.class_name == class_name)
            .count()
    }

    /// Snapshot of all entries, ordered by id.
    pub fn entries(&self) -> Vec<AclEntry> {
        let mut entries: Vec<AclEntry> =
            self.state.tables.read().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Snapshot of all domain entities, ordered by id.
    pub fn domain_entities(&self) -> Vec<AclDomainEntity> {
        let mut nodes: Vec<AclDomainEntity> = self
            .state
            .tables
            .read()
            .domain_entities
            .values()
            .cloned()
            .collect();
        nodes.sort_by_key(|d| d.id);
        nodes
    }

    /// Number of `has_permission` queries answered so far.
    pub fn permission_query_count(&self) -> u64 {
        self.state.permission_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AclStore for MemoryAclStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            held: HashMap::new(),
            undo: Vec::new(),
            finished: false,
        }))
    }
}

/// Transaction over a [`MemoryAclStore`].
pub struct MemoryTransaction {
    state: Arc<MemoryState>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    undo: Vec<Undo>,
    finished: bool,
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("held_locks", &self.held.len())
            .field("undo_len", &self.undo.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl MemoryTransaction {
    async fn lock_row(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        // The DashMap guard must be released before awaiting the row mutex.
        let mutex = Arc::clone(self.state.row_locks.entry(key.clone()).or_default().value());
        trace!(?key, "waiting for row lock");
        let guard = mutex.lock_owned().await;
        self.held.insert(key, guard);
    }

    /// Unlocks every held row and forgets row mutexes nobody else holds or
    /// waits on.
    fn release_row_locks(&mut self) {
        for (key, guard) in self.held.drain() {
            drop(guard);
            self.state
                .row_locks
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }

    fn roll_back_in_place(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        let mut tables = self.state.tables.write();
        while let Some(undo) = self.undo.pop() {
            tables.apply_undo(undo);
        }
    }

}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // The undo is applied before the rows are unlocked.
        if !self.finished {
            self.roll_back_in_place();
        }
        self.release_row_locks();
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_sid(&mut self, sid: &str, principal: bool) -> StorageResult<Option<AclSid>> {
        Ok(self.state.tables.read().find_sid(sid, principal).cloned())
    }

    #[instrument(skip(self))]
    async fn get_sid_for_update(
        &mut self,
        sid: &str,
        principal: bool,
    ) -> StorageResult<Option<AclSid>> {
        let id = self
            .state
            .tables
            .read()
            .find_sid(sid, principal)
            .map(|s| s.id);
        let Some(id) = id else {
            return Ok(None);
        };
        self.lock_row(RowKey::Sid(id)).await;
        Ok(self.state.tables.read().sids.get(&id).cloned())
    }

    async fn create_sid(&mut self, sid: &str, principal: bool) -> StorageResult<AclSid> {
        let mut tables = self.state.tables.write();
        if tables.find_sid(sid, principal).is_some() {
            return Err(StorageError::DuplicateRow {
                table: "acl_sid",
                key: format!("{sid}/{principal}"),
            });
        }
        let id = self.state.next_id();
        let row = AclSid {
            id,
            sid: sid.to_string(),
            principal,
        };
        tables.sids.insert(id, row.clone());
        self.undo.push(Undo::Sid(id, None));
        Ok(row)
    }

    async fn get_class_by_id(&mut self, id: i64) -> StorageResult<Option<AclDomainEntityClass>> {
        Ok(self.state.tables.read().classes.get(&id).cloned())
    }

    async fn get_class(
        &mut self,
        class_name: &str,
    ) -> StorageResult<Option<AclDomainEntityClass>> {
        Ok(self.state.tables.read().find_class(class_name).cloned())
    }

    #[instrument(skip(self))]
    async fn get_class_for_update(
        &mut self,
        class_name: &str,
    ) -> StorageResult<Option<AclDomainEntityClass>> {
        let id = self
            .state
            .tables
            .read()
            .find_class(class_name)
            .map(|c| c.id);
        let Some(id) = id else {
            return Ok(None);
        };
        self.lock_row(RowKey::Class(id)).await;
        Ok(self.state.tables.read().classes.get(&id).cloned())
    }

    async fn create_class(&mut self, class_name: &str) -> StorageResult<AclDomainEntityClass> {
        let mut tables = self.state.tables.write();
        if tables.find_class(class_name).is_some() {
            return Err(StorageError::DuplicateRow {
                table: "acl_domain_entity_class",
                key: class_name.to_string(),
            });
        }
        let id = self.state.next_id();
        let row = AclDomainEntityClass {
            id,
            class_name: class_name.to_string(),
        };
        tables.classes.insert(id, row.clone());
        self.undo.push(Undo::Class(id, None));
        Ok(row)
    }

    async fn get_domain_entity(&mut self, id: i64) -> StorageResult<Option<AclDomainEntity>> {
        Ok(self.state.tables.read().domain_entities.get(&id).cloned())
    }

    #[instrument(skip(self))]
    async fn get_domain_entity_for_update(
        &mut self,
        id: i64,
    ) -> StorageResult<Option<AclDomainEntity>> {
        self.lock_row(RowKey::DomainEntity(id)).await;
        Ok(self.state.tables.read().domain_entities.get(&id).cloned())
    }

    async fn find_domain_entity(
        &mut self,
        class_name: &str,
        entity_id: i64,
    ) -> StorageResult<Option<AclDomainEntity>> {
        Ok(self
            .state
            .tables
            .read()
            .find_domain_entity(class_name, entity_id)
            .cloned())
    }

    async fn find_domain_entity_for_update(
        &mut self,
        class_name: &str,
        entity_id: i64,
    ) -> StorageResult<Option<AclDomainEntity>> {
        let id = self
            .state
            .tables
            .read()
            .find_domain_entity(class_name, entity_id)
            .map(|d| d.id);
        match id {
            // The row may have been deleted while we waited for its lock.
            Some(id) => self.get_domain_entity_for_update(id).await,
            None => Ok(None),
        }
    }

    async fn create_domain_entity(
        &mut self,
        domain_entity: NewAclDomainEntity,
    ) -> StorageResult<AclDomainEntity> {
        let mut tables = self.state.tables.write();
        let class_name = tables
            .classes
            .get(&domain_entity.class_id)
            .map(|c| c.class_name.clone())
            .ok_or_else(|| StorageError::ConstraintViolation {
                table: "acl_domain_entity",
                message: format!("unknown class id {}", domain_entity.class_id),
            })?;
        if let Some(parent_id) = domain_entity.parent_id {
            if !tables.domain_entities.contains_key(&parent_id) {
                return Err(StorageError::ConstraintViolation {
                    table: "acl_domain_entity",
                    message: format!("unknown parent id {parent_id}"),
                });
            }
        }
        if !tables.sids.contains_key(&domain_entity.owner_sid_id) {
            return Err(StorageError::ConstraintViolation {
                table: "acl_domain_entity",
                message: format!("unknown owner sid id {}", domain_entity.owner_sid_id),
            });
        }
        if tables
            .find_domain_entity(&class_name, domain_entity.entity_id)
            .is_some()
        {
            return Err(StorageError::DuplicateRow {
                table: "acl_domain_entity",
                key: format!("{class_name}#{}", domain_entity.entity_id),
            });
        }

        let id = self.state.next_id();
        let row = AclDomainEntity {
            id,
            class_id: domain_entity.class_id,
            entity_id: domain_entity.entity_id,
            parent_id: domain_entity.parent_id,
            owner_sid_id: domain_entity.owner_sid_id,
            entries_inheriting: domain_entity.entries_inheriting,
        };
        tables.domain_entities.insert(id, row.clone());
        self.undo.push(Undo::DomainEntity(id, None));
        Ok(row)
    }

    async fn update_domain_entity(&mut self, domain_entity: &AclDomainEntity) -> StorageResult<()> {
        let mut tables = self.state.tables.write();
        if let Some(parent_id) = domain_entity.parent_id {
            if !tables.domain_entities.contains_key(&parent_id) {
                return Err(StorageError::ConstraintViolation {
                    table: "acl_domain_entity",
                    message: format!("unknown parent id {parent_id}"),
                });
            }
        }
        if !tables.domain_entities.contains_key(&domain_entity.id) {
            return Err(StorageError::RowNotFound {
                table: "acl_domain_entity",
                id: domain_entity.id,
            });
        }
        let previous = tables
            .domain_entities
            .insert(domain_entity.id, domain_entity.clone());
        self.undo.push(Undo::DomainEntity(domain_entity.id, previous));
        Ok(())
    }

    async fn delete_domain_entity(&mut self, id: i64) -> StorageResult<()> {
        let previous = self.state.tables.write().domain_entities.remove(&id);
        match previous {
            Some(row) => {
                self.undo.push(Undo::DomainEntity(id, Some(row)));
                Ok(())
            }
            None => Err(StorageError::RowNotFound {
                table: "acl_domain_entity",
                id,
            }),
        }
    }

    async fn get_permission(&mut self, id: i64) -> StorageResult<Option<AclPermission>> {
        Ok(self.state.tables.read().permissions.get(&id).cloned())
    }

    async fn find_permission(&mut self, name: &str) -> StorageResult<Option<AclPermission>> {
        Ok(self.state.tables.read().find_permission(name).cloned())
    }

    async fn create_permission(&mut self, name: &str, mask: u32) -> StorageResult<AclPermission> {
        let mut tables = self.state.tables.write();
        if tables.find_permission(name).is_some() {
            return Err(StorageError::DuplicateRow {
                table: "acl_permission",
                key: name.to_string(),
            });
        }
        let id = self.state.next_id();
        let row = AclPermission {
            id,
            name: name.to_string(),
            mask,
        };
        tables.permissions.insert(id, row.clone());
        self.undo.push(Undo::Permission(id, None));
        Ok(row)
    }

    async fn get_entry_template(&mut self, id: i64) -> StorageResult<Option<AclEntryTemplate>> {
        Ok(self.state.tables.read().templates.get(&id).cloned())
    }

    async fn find_entry_templates_by_domain_entity_and_sid(
        &mut self,
        class_name: &str,
        entity_id: i64,
        sid_id: i64,
    ) -> StorageResult<Vec<AclEntryTemplate>> {
        let tables = self.state.tables.read();
        let Some(domain_entity) = tables.find_domain_entity(class_name, entity_id) else {
            return Ok(Vec::new());
        };
        let template_ids: HashSet<i64> = tables
            .entries
            .values()
            .filter(|e| e.sid_id == sid_id)
            .map(|e| e.entry_template_id)
            .collect();
        let mut templates: Vec<AclEntryTemplate> = tables
            .templates
            .values()
            .filter(|t| t.domain_entity_id == domain_entity.id && template_ids.contains(&t.id))
            .cloned()
            .collect();
        templates.sort_by_key(|t| t.id);
        Ok(templates)
    }

    async fn create_entry_template(
        &mut self,
        template: NewAclEntryTemplate,
    ) -> StorageResult<AclEntryTemplate> {
        let mut tables = self.state.tables.write();
        if !tables
            .domain_entities
            .contains_key(&template.domain_entity_id)
        {
            return Err(StorageError::ConstraintViolation {
                table: "acl_entry_template",
                message: format!("unknown domain entity id {}", template.domain_entity_id),
            });
        }
        if !tables.permissions.contains_key(&template.permission_id) {
            return Err(StorageError::ConstraintViolation {
                table: "acl_entry_template",
                message: format!("unknown permission id {}", template.permission_id),
            });
        }
        let id = self.state.next_id();
        let row = AclEntryTemplate {
            id,
            domain_entity_id: template.domain_entity_id,
            permission_id: template.permission_id,
            granting: template.granting,
        };
        tables.templates.insert(id, row.clone());
        self.undo.push(Undo::Template(id, None));
        Ok(row)
    }

    async fn delete_entry_template(&mut self, id: i64) -> StorageResult<()> {
        let mut tables = self.state.tables.write();
        let derived: Vec<i64> = tables
            .entries
            .values()
            .filter(|e| e.entry_template_id == id)
            .map(|e| e.id)
            .collect();
        for entry_id in derived {
            let previous = tables.entries.remove(&entry_id);
            self.undo.push(Undo::Entry(entry_id, previous));
        }
        if let Some(previous) = tables.templates.remove(&id) {
            self.undo.push(Undo::Template(id, Some(previous)));
        }
        Ok(())
    }

    async fn find_entries_by_sid(&mut self, sid_id: i64) -> StorageResult<Vec<AclEntry>> {
        let mut entries: Vec<AclEntry> = self
            .state
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.sid_id == sid_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn find_entries_by_template(
        &mut self,
        template_id: i64,
    ) -> StorageResult<Vec<AclEntry>> {
        let mut entries: Vec<AclEntry> = self
            .state
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.entry_template_id == template_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn find_entries_by_sid_and_template(
        &mut self,
        sid_id: i64,
        template_id: i64,
    ) -> StorageResult<Vec<AclEntry>> {
        let mut entries: Vec<AclEntry> = self
            .state
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.sid_id == sid_id && e.entry_template_id == template_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn find_entries_by_domain_entity_sid_and_template(
        &mut self,
        class_name: &str,
        entity_id: i64,
        sid_id: i64,
        template_id: i64,
    ) -> StorageResult<Vec<AclEntry>> {
        let tables = self.state.tables.read();
        let Some(domain_entity) = tables.find_domain_entity(class_name, entity_id) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<AclEntry> = tables
            .entries
            .values()
            .filter(|e| {
                e.domain_entity_id == domain_entity.id
                    && e.sid_id == sid_id
                    && e.entry_template_id == template_id
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn create_entry(&mut self, entry: NewAclEntry) -> StorageResult<AclEntry> {
        let mut tables = self.state.tables.write();
        let missing = if !tables.domain_entities.contains_key(&entry.domain_entity_id) {
            Some(format!("unknown domain entity id {}", entry.domain_entity_id))
        } else if !tables.sids.contains_key(&entry.sid_id) {
            Some(format!("unknown sid id {}", entry.sid_id))
        } else if !tables.permissions.contains_key(&entry.permission_id) {
            Some(format!("unknown permission id {}", entry.permission_id))
        } else if !tables.templates.contains_key(&entry.entry_template_id) {
            Some(format!("unknown entry template id {}", entry.entry_template_id))
        } else {
            None
        };
        if let Some(message) = missing {
            return Err(StorageError::ConstraintViolation {
                table: "acl_entry",
                message,
            });
        }

        let id = self.state.next_id();
        let row = AclEntry {
            id,
            domain_entity_id: entry.domain_entity_id,
            sid_id: entry.sid_id,
            permission_id: entry.permission_id,
            granting: entry.granting,
            entry_template_id: entry.entry_template_id,
        };
        tables.entries.insert(id, row.clone());
        self.undo.push(Undo::Entry(id, None));
        Ok(row)
    }

    async fn delete_entry(&mut self, id: i64) -> StorageResult<()> {
        if let Some(previous) = self.state.tables.write().entries.remove(&id) {
            self.undo.push(Undo::Entry(id, Some(previous)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lock_user_account(&mut self, user_id: &str) -> StorageResult<bool> {
        if !self.state.tables.read().accounts.contains(user_id) {
            return Ok(false);
        }
        self.lock_row(RowKey::Account(user_id.to_string())).await;
        Ok(true)
    }

    async fn has_permission(
        &mut self,
        domain_entity_id: i64,
        user_id: &str,
        mask: u32,
    ) -> StorageResult<bool> {
        self.state.permission_queries.fetch_add(1, Ordering::SeqCst);

        let tables = self.state.tables.read();
        let Some(sid) = tables.find_sid(user_id, true) else {
            return Ok(false);
        };

        let mut granted = 0u32;
        let mut visited = HashSet::new();
        let mut current = tables.domain_entities.get(&domain_entity_id);
        while let Some(node) = current {
            if !visited.insert(node.id) {
                break;
            }
            granted |= tables.granted_mask(node.id, sid.id);
            if granted & mask == mask {
                return Ok(true);
            }
            if !node.entries_inheriting {
                break;
            }
            current = node
                .parent_id
                .and_then(|parent_id| tables.domain_entities.get(&parent_id));
        }
        Ok(false)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        this.finished = true;
        this.undo.clear();
        trace!(released_locks = this.held.len(), "transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        this.roll_back_in_place();
        this.finished = true;
        debug!(released_locks = this.held.len(), "transaction rolled back");
        Ok(())
    }
}
