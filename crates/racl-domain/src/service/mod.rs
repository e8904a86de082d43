//! The ACL service façade.
//!
//! [`AclService`] owns the collaborators (store, notifier, listeners, caches)
//! and exposes lookups, permission checks and one-shot mutations. Every
//! mutation is also available on [`AclOperation`], the unit of work that
//! groups several mutations into one store transaction, one modification
//! context and one round of notifications.
//!
//! # Locking
//!
//! Structural changes lock the root node, then the target node. Entry
//! changes lock the acting user's account, and the flush locks every touched
//! node in ascending id order. SID and class registration run in their own
//! short transactions that lock a single row and never wait while holding it.
//! Within one operation, entry changes must come before structural changes:
//! once the root is locked, locking an account fails with
//! [`AclError::InvalidArgument`].

mod entry;
mod operation;
mod registry;
mod tree;

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use racl_storage::{
    AclDomainEntity, AclDomainEntityClass, AclEntryTemplate, AclSid, AclStore, NewAclEntryTemplate,
};
use tracing::{debug, instrument, warn};

use crate::cache::{
    HasPermissionCache, HasPermissionCacheKey, PermissionCacheConfig, PermissionCacheRegistry,
};
use crate::error::{AclError, AclResult};
use crate::listener::{
    AclModificationListener, AclModificationListenerRegister, PermissionCacheInvalidator,
};
use crate::model::{EntityClassHierarchy, PermissionMask};
use crate::notify::{AclNotification, AclNotifier};
use crate::user_context::require_current_user;

pub use operation::AclOperation;

/// Configuration for [`AclService`].
#[derive(Debug, Clone)]
pub struct AclServiceConfig {
    /// SID of the system administrator. Its row serializes SID creation.
    pub system_administrator: String,
    /// Owner assigned to newly created domain entities.
    pub default_owner: String,
    /// Class of the root domain entity. Its row serializes class creation.
    pub root_class: String,
    /// External id of the root domain entity.
    pub root_entity_id: i64,
    /// `entries_inheriting` flag of newly created domain entities.
    pub default_entries_inheriting: bool,
    /// Register [`PermissionCacheInvalidator`] on construction.
    pub register_cache_invalidator: bool,
    /// Capacity of each SID/class/domain entity lookup cache.
    pub lookup_cache_capacity: u64,
    /// Optional TTL of the lookup caches.
    pub lookup_cache_ttl: Option<Duration>,
    /// Per-principal permission cache settings.
    pub permission_cache: PermissionCacheConfig,
}

impl Default for AclServiceConfig {
    fn default() -> Self {
        Self {
            system_administrator: "admin".to_string(),
            default_owner: "admin".to_string(),
            root_class: "racl.RootEntity".to_string(),
            root_entity_id: 1,
            default_entries_inheriting: true,
            register_cache_invalidator: true,
            lookup_cache_capacity: 10_000,
            lookup_cache_ttl: None,
            permission_cache: PermissionCacheConfig::default(),
        }
    }
}

impl AclServiceConfig {
    /// Sets the system administrator SID (and the default owner).
    pub fn with_system_administrator(mut self, sid: impl Into<String>) -> Self {
        let sid = sid.into();
        self.default_owner = sid.clone();
        self.system_administrator = sid;
        self
    }

    pub fn with_default_owner(mut self, sid: impl Into<String>) -> Self {
        self.default_owner = sid.into();
        self
    }

    /// Sets the root domain entity.
    pub fn with_root(mut self, root_class: impl Into<String>, root_entity_id: i64) -> Self {
        self.root_class = root_class.into();
        self.root_entity_id = root_entity_id;
        self
    }

    pub fn with_default_entries_inheriting(mut self, inheriting: bool) -> Self {
        self.default_entries_inheriting = inheriting;
        self
    }

    pub fn with_cache_invalidator(mut self, enabled: bool) -> Self {
        self.register_cache_invalidator = enabled;
        self
    }

    pub fn with_lookup_cache(mut self, capacity: u64, ttl: Option<Duration>) -> Self {
        self.lookup_cache_capacity = capacity;
        self.lookup_cache_ttl = ttl;
        self
    }

    pub fn with_permission_cache(mut self, config: PermissionCacheConfig) -> Self {
        self.permission_cache = config;
        self
    }
}

/// Work deferred until the store transaction committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AfterCommit {
    Notify(AclNotification),
    ForgetDomainEntity { class_name: String, entity_id: i64 },
    /// Repeats the invalidation done inside the operation, so decisions
    /// computed against uncommitted data do not outlive the commit.
    InvalidatePermissionCaches,
}

pub(crate) struct LookupCaches {
    sids: Cache<String, AclSid>,
    classes: Cache<String, AclDomainEntityClass>,
    classes_by_id: Cache<i64, AclDomainEntityClass>,
    domain_entity_ids: Cache<(String, i64), i64>,
}

impl LookupCaches {
    fn new(capacity: u64, ttl: Option<Duration>) -> Self {
        fn build<K, V>(capacity: u64, ttl: Option<Duration>) -> Cache<K, V>
        where
            K: std::hash::Hash + Eq + Send + Sync + 'static,
            V: Clone + Send + Sync + 'static,
        {
            let mut builder = Cache::builder().max_capacity(capacity);
            if let Some(ttl) = ttl {
                builder = builder.time_to_live(ttl);
            }
            builder.build()
        }

        Self {
            sids: build(capacity, ttl),
            classes: build(capacity, ttl),
            classes_by_id: build(capacity, ttl),
            domain_entity_ids: build(capacity, ttl),
        }
    }
}

/// ACL engine entry point.
pub struct AclService {
    store: Arc<dyn AclStore>,
    notifier: Arc<dyn AclNotifier>,
    config: AclServiceConfig,
    hierarchy: Arc<EntityClassHierarchy>,
    listeners: AclModificationListenerRegister,
    permission_caches: Arc<PermissionCacheRegistry>,
    lookups: LookupCaches,
}

impl std::fmt::Debug for AclService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclService")
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl AclService {
    /// Creates a service over `store` that announces changes through `notifier`.
    pub fn new(
        store: Arc<dyn AclStore>,
        notifier: Arc<dyn AclNotifier>,
        config: AclServiceConfig,
    ) -> Self {
        let permission_caches = Arc::new(PermissionCacheRegistry::new(
            config.permission_cache.clone(),
        ));
        let listeners = AclModificationListenerRegister::new();
        if config.register_cache_invalidator {
            listeners.register(Arc::new(PermissionCacheInvalidator::new(Arc::clone(
                &permission_caches,
            ))));
        }
        let lookups = LookupCaches::new(config.lookup_cache_capacity, config.lookup_cache_ttl);

        Self {
            store,
            notifier,
            config,
            hierarchy: Arc::new(EntityClassHierarchy::new()),
            listeners,
            permission_caches,
            lookups,
        }
    }

    /// Uses `hierarchy` to answer subtype queries.
    pub fn with_hierarchy(mut self, hierarchy: Arc<EntityClassHierarchy>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn config(&self) -> &AclServiceConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &EntityClassHierarchy {
        &self.hierarchy
    }

    pub fn listeners(&self) -> &AclModificationListenerRegister {
        &self.listeners
    }

    /// Appends a modification listener.
    pub fn register_listener(&self, listener: Arc<dyn AclModificationListener>) {
        self.listeners.register(listener);
    }

    /// Starts a unit of work.
    pub async fn begin(&self) -> AclResult<AclOperation<'_>> {
        let tx = self.store.begin().await?;
        Ok(AclOperation::new(self, tx))
    }

    pub(crate) async fn run_after_commit(&self, tasks: Vec<AfterCommit>) {
        for task in tasks {
            match task {
                AfterCommit::ForgetDomainEntity {
                    class_name,
                    entity_id,
                } => {
                    self.lookups
                        .domain_entity_ids
                        .invalidate(&(class_name, entity_id))
                        .await;
                }
                AfterCommit::InvalidatePermissionCaches => {
                    self.permission_caches.invalidate_all();
                }
                AfterCommit::Notify(notification) => self.send(notification).await,
            }
        }
    }

    async fn send(&self, notification: AclNotification) {
        let result = match &notification {
            AclNotification::DomainEntitiesModified(ids) => {
                self.notifier.send_modified(ids.clone()).await
            }
            AclNotification::DomainEntitiesDeleted(ids) => {
                self.notifier.send_deleted(ids.clone()).await
            }
        };
        match result {
            Ok(()) => {
                metrics::counter!("racl_notifications_sent_total").increment(1);
                debug!(?notification, "sent notification");
            }
            Err(error) => warn!(%error, ?notification, "failed to send notification after commit"),
        }
    }

    // ------------------------------------------------------------------
    // Domain entity lookups
    // ------------------------------------------------------------------

    /// Internal id of the domain entity `(class_name, entity_id)`.
    ///
    /// Found ids are cached until the node is deleted; misses are not cached.
    pub async fn domain_entity_id(&self, class_name: &str, entity_id: i64) -> AclResult<i64> {
        let key = (class_name.to_string(), entity_id);
        if let Some(id) = self.lookups.domain_entity_ids.get(&key).await {
            return Ok(id);
        }
        let domain_entity = self.domain_entity(class_name, entity_id).await?;
        self.lookups
            .domain_entity_ids
            .insert(key, domain_entity.id)
            .await;
        Ok(domain_entity.id)
    }

    pub async fn domain_entity(
        &self,
        class_name: &str,
        entity_id: i64,
    ) -> AclResult<AclDomainEntity> {
        let mut op = self.begin().await?;
        let domain_entity = op.domain_entity(class_name, entity_id).await?;
        op.commit().await?;
        Ok(domain_entity)
    }

    pub async fn domain_entity_by_id(&self, domain_entity_id: i64) -> AclResult<AclDomainEntity> {
        let mut op = self.begin().await?;
        let domain_entity = op.domain_entity_by_id(domain_entity_id).await?;
        op.commit().await?;
        Ok(domain_entity)
    }

    // ------------------------------------------------------------------
    // Permission checks
    // ------------------------------------------------------------------

    /// Decides whether `user_id` holds every bit of `mask` on `(class_name, entity_id)`.
    #[instrument(skip(self, mask), fields(mask = mask.bits()))]
    pub async fn has_permission(
        &self,
        class_name: &str,
        entity_id: i64,
        mask: PermissionMask,
        user_id: &str,
    ) -> AclResult<bool> {
        if mask.is_empty() {
            return Err(AclError::invalid_argument("permission mask must not be empty"));
        }
        let domain_entity_id = self.domain_entity_id(class_name, entity_id).await?;
        let key = HasPermissionCacheKey::new(domain_entity_id, mask.bits());
        let cache = self.permission_caches.cache_for(user_id);
        if let Some(allowed) = cache.get(&key).await {
            return Ok(allowed);
        }

        let generation = self.permission_caches.generation();
        let mut tx = self.store.begin().await?;
        let allowed = tx
            .has_permission(domain_entity_id, user_id, mask.bits())
            .await?;
        tx.commit().await?;
        self.permission_caches
            .put_if_current(user_id, key, allowed, generation)
            .await;
        debug!(domain_entity_id, allowed, "computed permission decision");
        Ok(allowed)
    }

    pub async fn has_permission_for_current_user(
        &self,
        class_name: &str,
        entity_id: i64,
        mask: PermissionMask,
    ) -> AclResult<bool> {
        let user_id = require_current_user()?;
        self.has_permission(class_name, entity_id, mask, &user_id)
            .await
    }

    /// Like [`has_permission`](Self::has_permission), but a denial is an
    /// [`AclError::NoPermission`].
    pub async fn check_permission(
        &self,
        class_name: &str,
        entity_id: i64,
        mask: PermissionMask,
        user_id: &str,
    ) -> AclResult<()> {
        if self
            .has_permission(class_name, entity_id, mask, user_id)
            .await?
        {
            Ok(())
        } else {
            Err(AclError::NoPermission {
                class: class_name.to_string(),
                entity_id,
                mask: mask.bits(),
                user_id: user_id.to_string(),
            })
        }
    }

    pub async fn check_permission_for_current_user(
        &self,
        class_name: &str,
        entity_id: i64,
        mask: PermissionMask,
    ) -> AclResult<()> {
        let user_id = require_current_user()?;
        self.check_permission(class_name, entity_id, mask, &user_id)
            .await
    }

    /// Name of the permission cache holding `user_id`'s decisions.
    pub fn has_permission_cache_name(&self, user_id: &str) -> String {
        self.permission_caches.cache_name(user_id)
    }

    /// `user_id`'s permission cache, created on first use.
    pub fn has_permission_cache(&self, user_id: &str) -> Arc<HasPermissionCache> {
        self.permission_caches.cache_for(user_id)
    }

    /// Clears the permission caches of every principal.
    pub fn invalidate_has_permission_cache(&self) {
        self.permission_caches.invalidate_all();
    }

    pub fn permission_caches(&self) -> &Arc<PermissionCacheRegistry> {
        &self.permission_caches
    }
}

/// One-shot mutations: each runs the [`AclOperation`] method of the same
/// name in its own unit of work and commits it.
impl AclService {
    pub async fn update_or_create_domain_entity(
        &self,
        class_name: &str,
        entity_id: i64,
        parent: Option<(&str, i64)>,
    ) -> AclResult<AclDomainEntity> {
        let mut op = self.begin().await?;
        let domain_entity = op
            .update_or_create_domain_entity(class_name, entity_id, parent)
            .await?;
        op.commit().await?;
        Ok(domain_entity)
    }

    pub async fn delete_domain_entity(&self, class_name: &str, entity_id: i64) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.delete_domain_entity(class_name, entity_id).await?;
        op.commit().await
    }

    pub async fn create_entry_template(
        &self,
        template: NewAclEntryTemplate,
    ) -> AclResult<AclEntryTemplate> {
        let mut op = self.begin().await?;
        let created = op.create_entry_template(template).await?;
        op.commit().await?;
        Ok(created)
    }

    pub async fn delete_entry_template(&self, template_id: i64) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.delete_entry_template(template_id).await?;
        op.commit().await
    }

    pub async fn create_entry(
        &self,
        template: &AclEntryTemplate,
        user_id: &str,
    ) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.create_entry(template, user_id).await?;
        op.commit().await
    }

    pub async fn create_entry_for(
        &self,
        class_name: &str,
        entity_id: i64,
        template: &AclEntryTemplate,
        user_id: &str,
    ) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.create_entry_for(class_name, entity_id, template, user_id)
            .await?;
        op.commit().await
    }

    pub async fn delete_entry(&self, template_id: i64, user_id: &str) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.delete_entry(template_id, user_id).await?;
        op.commit().await
    }

    pub async fn delete_all_entries(&self, template_id: i64, user_id: &str) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.delete_all_entries(template_id, user_id).await?;
        op.commit().await
    }

    pub async fn delete_entry_for(
        &self,
        class_name: &str,
        entity_id: i64,
        template_id: i64,
        user_id: &str,
    ) -> AclResult<()> {
        let mut op = self.begin().await?;
        op.delete_entry_for(class_name, entity_id, template_id, user_id)
            .await?;
        op.commit().await
    }
}
