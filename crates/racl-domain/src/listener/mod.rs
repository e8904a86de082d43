//! Modification listeners and their register.
//!
//! Listeners observe ACL mutations at a fixed set of extension points. All
//! hooks are awaited in registration order inside the triggering operation;
//! a hook error aborts that operation. `before_create_entry` may replace the
//! template or veto the creation, `before_delete_entry` may veto a deletion.

mod invalidation;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use racl_storage::{AclDomainEntity, AclEntryTemplate};
use tracing::debug;

use crate::context::AclModificationContext;
use crate::error::ListenerResult;

pub use invalidation::PermissionCacheInvalidator;

/// Observer of ACL modifications.
///
/// Every hook has a no-op default, so implementations only override the
/// extension points they care about.
#[async_trait]
pub trait AclModificationListener: Send + Sync {
    /// Name used for registration and in error reports.
    fn name(&self) -> &str;

    /// Called after a domain entity node has been inserted.
    async fn after_create_domain_entity(
        &self,
        _domain_entity: &AclDomainEntity,
    ) -> ListenerResult<()> {
        Ok(())
    }

    /// Called after a node has been attached to a different parent.
    async fn after_domain_entity_parent_change(
        &self,
        _domain_entity_id: i64,
        _previous_parent_id: Option<i64>,
        _new_parent_id: i64,
    ) -> ListenerResult<()> {
        Ok(())
    }

    /// Called with the locked node right before it is deleted.
    async fn before_delete_domain_entity(
        &self,
        _domain_entity: &AclDomainEntity,
    ) -> ListenerResult<()> {
        Ok(())
    }

    /// Called before an entry is staged for `user_id`.
    ///
    /// Returns the template to create the entry from, which may differ from
    /// the one passed in. `None` vetoes the creation silently.
    async fn before_create_entry(
        &self,
        template: AclEntryTemplate,
        _user_id: &str,
    ) -> ListenerResult<Option<AclEntryTemplate>> {
        Ok(Some(template))
    }

    /// Called before entries of `template_id` are staged for deletion for
    /// `user_id`. `false` vetoes the deletion silently.
    async fn before_delete_entry(&self, _template_id: i64, _user_id: &str) -> ListenerResult<bool> {
        Ok(true)
    }

    /// Called with the complete batch once a modification context has been written.
    async fn after_flush_modification_context(
        &self,
        _context: &AclModificationContext,
    ) -> ListenerResult<()> {
        Ok(())
    }
}

/// Ordered collection of modification listeners.
///
/// Hooks are dispatched against a snapshot, so (un)registering while an
/// operation is running affects only later dispatches.
#[derive(Default)]
pub struct AclModificationListenerRegister {
    listeners: RwLock<Vec<Arc<dyn AclModificationListener>>>,
}

impl std::fmt::Debug for AclModificationListenerRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclModificationListenerRegister")
            .field("listeners", &self.names())
            .finish()
    }
}

impl AclModificationListenerRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener. Listeners run in registration order.
    pub fn register(&self, listener: Arc<dyn AclModificationListener>) {
        debug!(listener = listener.name(), "registering modification listener");
        self.listeners.write().push(listener);
    }

    /// Removes every listener with the given name. Returns `true` if any was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() < before
    }

    /// Registered listeners in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn AclModificationListener>> {
        self.listeners.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.listeners
            .read()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl AclModificationListener for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn template() -> AclEntryTemplate {
        AclEntryTemplate {
            id: 1,
            domain_entity_id: 2,
            permission_id: 3,
            granting: true,
        }
    }

    #[test]
    fn test_register_keeps_order() {
        let register = AclModificationListenerRegister::new();
        register.register(Arc::new(Named("first")));
        register.register(Arc::new(Named("second")));

        assert_eq!(register.names(), vec!["first", "second"]);
        assert_eq!(register.len(), 2);
    }

    #[test]
    fn test_unregister_by_name() {
        let register = AclModificationListenerRegister::new();
        register.register(Arc::new(Named("first")));
        register.register(Arc::new(Named("second")));

        assert!(register.unregister("first"));
        assert!(!register.unregister("missing"));
        assert_eq!(register.names(), vec!["second"]);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_changes() {
        let register = AclModificationListenerRegister::new();
        register.register(Arc::new(Named("first")));
        let snapshot = register.snapshot();

        register.register(Arc::new(Named("second")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(register.len(), 2);
    }

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        let listener = Named("noop");

        let kept = listener.before_create_entry(template(), "alice").await.unwrap();
        let allowed = listener.before_delete_entry(1, "alice").await.unwrap();

        assert_eq!(kept, Some(template()));
        assert!(allowed);
    }
}
