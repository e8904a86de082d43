//! Listener that keeps permission caches consistent with ACL changes.

use std::sync::Arc;

use async_trait::async_trait;
use racl_storage::AclDomainEntity;

use crate::cache::PermissionCacheRegistry;
use crate::context::AclModificationContext;
use crate::error::ListenerResult;

/// Clears every principal's permission cache whenever entries, tree
/// structure or a node's existence change.
///
/// These hooks run inside the operation. The operation clears the caches
/// again once it commits or aborts, which drops decisions cached from its
/// uncommitted rows.
#[derive(Debug, Clone)]
pub struct PermissionCacheInvalidator {
    caches: Arc<PermissionCacheRegistry>,
}

impl PermissionCacheInvalidator {
    pub const NAME: &'static str = "permission-cache-invalidator";

    pub fn new(caches: Arc<PermissionCacheRegistry>) -> Self {
        Self { caches }
    }
}

#[async_trait]
impl super::AclModificationListener for PermissionCacheInvalidator {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn after_domain_entity_parent_change(
        &self,
        _domain_entity_id: i64,
        _previous_parent_id: Option<i64>,
        _new_parent_id: i64,
    ) -> ListenerResult<()> {
        self.caches.invalidate_all();
        Ok(())
    }

    async fn before_delete_domain_entity(
        &self,
        _domain_entity: &AclDomainEntity,
    ) -> ListenerResult<()> {
        self.caches.invalidate_all();
        Ok(())
    }

    async fn after_flush_modification_context(
        &self,
        _context: &AclModificationContext,
    ) -> ListenerResult<()> {
        self.caches.invalidate_all();
        Ok(())
    }
}
