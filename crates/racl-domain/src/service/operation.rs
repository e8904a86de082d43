//! Unit of work: store transaction, modification context and deferred work.

use std::sync::Arc;

use racl_storage::StoreTransaction;
use tracing::debug;

use super::{AclService, AfterCommit};
use crate::cache::PermissionCacheRegistry;
use crate::context::AclModificationContext;
use crate::error::{AclError, AclResult};
use crate::notify::AclNotification;

/// A logical ACL operation.
///
/// Mutations stage entry changes into the operation's modification context
/// and queue notifications. [`commit`](Self::commit) flushes the context,
/// commits the store transaction and only then sends notifications.
/// Dropping the operation without committing rolls everything back.
///
/// Entry changes lock the acting user's account and structural changes lock
/// the root node. Once an operation holds the root it refuses to stage entry
/// changes, so every operation takes the account before the root.
pub struct AclOperation<'a> {
    pub(super) service: &'a AclService,
    pub(super) tx: Box<dyn StoreTransaction>,
    context: Option<AclModificationContext>,
    after_commit: Vec<AfterCommit>,
    root_locked: bool,
    cache_reset: CacheResetOnAbort,
}

/// Clears the permission caches when an operation that already changed ACL
/// data ends without a successful commit.
struct CacheResetOnAbort {
    caches: Option<Arc<PermissionCacheRegistry>>,
    armed: bool,
}

impl Drop for CacheResetOnAbort {
    fn drop(&mut self) {
        if let (true, Some(caches)) = (self.armed, &self.caches) {
            debug!("operation abandoned after writes, clearing permission caches");
            caches.invalidate_all();
        }
    }
}

impl std::fmt::Debug for AclOperation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclOperation")
            .field("context", &self.context)
            .field("after_commit", &self.after_commit)
            .finish_non_exhaustive()
    }
}

impl<'a> AclOperation<'a> {
    pub(super) fn new(service: &'a AclService, tx: Box<dyn StoreTransaction>) -> Self {
        let caches = service
            .config
            .register_cache_invalidator
            .then(|| Arc::clone(&service.permission_caches));
        Self {
            service,
            tx,
            context: None,
            after_commit: Vec::new(),
            root_locked: false,
            cache_reset: CacheResetOnAbort {
                caches,
                armed: false,
            },
        }
    }

    pub fn service(&self) -> &'a AclService {
        self.service
    }

    /// Flushes a pending modification context, commits the store
    /// transaction, then runs the deferred notifications and cache evictions.
    pub async fn commit(mut self) -> AclResult<()> {
        self.flush_modification_context().await?;
        let AclOperation {
            service,
            tx,
            after_commit,
            mut cache_reset,
            ..
        } = self;
        tx.commit().await?;
        // The after-commit queue clears the caches from here on.
        cache_reset.armed = false;
        service.run_after_commit(after_commit).await;
        Ok(())
    }

    /// Discards the modification context and rolls back the store transaction.
    ///
    /// Permission caches are cleared once the rollback is done if the
    /// operation had already written ACL changes.
    pub async fn rollback(self) -> AclResult<()> {
        let AclOperation {
            tx, cache_reset, ..
        } = self;
        tx.rollback().await?;
        drop(cache_reset);
        Ok(())
    }

    pub(super) fn after_commit(&mut self, task: AfterCommit) {
        self.after_commit.push(task);
    }

    /// Marks the operation as having written ACL data that permission
    /// decisions depend on. The caches are cleared again after commit, or
    /// when the operation is rolled back or dropped.
    pub(super) fn note_permission_relevant_write(&mut self) {
        if self.cache_reset.caches.is_none() || self.cache_reset.armed {
            return;
        }
        self.cache_reset.armed = true;
        self.after_commit(AfterCommit::InvalidatePermissionCaches);
    }

    pub(super) fn mark_root_locked(&mut self) {
        self.root_locked = true;
    }

    /// Entry changes lock the user's account, which must come before the root.
    pub(super) fn ensure_entry_changes_allowed(&self) -> AclResult<()> {
        if self.root_locked {
            return Err(AclError::invalid_argument(
                "entry changes must be staged before structural changes in one operation",
            ));
        }
        Ok(())
    }

    /// Notifications queued for delivery after commit.
    pub fn pending_notifications(&self) -> Vec<&AclNotification> {
        self.after_commit
            .iter()
            .filter_map(|task| match task {
                AfterCommit::Notify(notification) => Some(notification),
                AfterCommit::ForgetDomainEntity { .. }
                | AfterCommit::InvalidatePermissionCaches => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Modification context
    // ------------------------------------------------------------------

    pub fn is_modification_context_created(&self) -> bool {
        self.context.is_some()
    }

    /// Returns the operation's modification context, creating it if absent.
    ///
    /// Whoever creates the context is responsible for flushing it.
    pub fn create_modification_context(&mut self) -> &mut AclModificationContext {
        self.context.get_or_insert_with(|| {
            debug!("created modification context");
            AclModificationContext::new()
        })
    }

    pub fn modification_context(&self) -> Option<&AclModificationContext> {
        self.context.as_ref()
    }

    /// Drops the modification context without writing anything.
    pub fn delete_modification_context(&mut self) {
        if self.context.take().is_some() {
            debug!("discarded modification context");
        }
    }

    /// Writes the staged changes of the modification context.
    ///
    /// Staged template deletions are expanded into deletions of their
    /// entries, every touched node is locked in ascending id order, entries
    /// are deleted and created, then the templates are deleted. The context
    /// is consumed even if the flush fails.
    pub async fn flush_modification_context(&mut self) -> AclResult<()> {
        let Some(mut context) = self.context.take() else {
            return Ok(());
        };

        let template_ids: Vec<i64> = context.entry_templates_to_delete().collect();
        for template_id in &template_ids {
            for entry in self.tx.find_entries_by_template(*template_id).await? {
                context.stage_entry_deletion(entry);
            }
        }

        if !context.is_empty() {
            self.note_permission_relevant_write();
        }

        let mut modified = Vec::new();
        for (domain_entity_id, modification) in context.modifications() {
            let domain_entity = self
                .tx
                .get_domain_entity_for_update(domain_entity_id)
                .await?
                .ok_or(AclError::DomainEntityIdNotFound {
                    id: domain_entity_id,
                })?;
            for entry in modification.entries_to_delete() {
                self.tx.delete_entry(entry.id).await?;
            }
            for entry in modification.entries_to_create() {
                let mut entry = entry.clone();
                entry.domain_entity_id = domain_entity.id;
                self.tx.create_entry(entry).await?;
            }
            modified.push(domain_entity.id);
        }

        for template_id in template_ids {
            self.tx.delete_entry_template(template_id).await?;
        }

        for listener in self.service.listeners.snapshot() {
            listener
                .after_flush_modification_context(&context)
                .await
                .map_err(|e| {
                    AclError::listener(listener.name(), "after_flush_modification_context", e)
                })?;
        }

        debug!(
            created = context.created_count(),
            deleted = context.deleted_count(),
            nodes = modified.len(),
            "flushed modification context"
        );
        if !modified.is_empty() {
            self.after_commit(AfterCommit::Notify(
                AclNotification::DomainEntitiesModified(modified),
            ));
        }
        Ok(())
    }

    /// Creator flag for a staging call: `true` if no context existed yet.
    pub(super) fn begin_staging(&self) -> bool {
        !self.is_modification_context_created()
    }

    /// Completes a staging call. On success the creator flushes; on failure
    /// the context is discarded.
    pub(super) async fn finish_staging(
        &mut self,
        creator: bool,
        result: AclResult<()>,
    ) -> AclResult<()> {
        match result {
            Ok(()) if creator => self.flush_modification_context().await,
            Ok(()) => Ok(()),
            Err(error) => {
                self.delete_modification_context();
                Err(error)
            }
        }
    }
}
