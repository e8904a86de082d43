//! Per-principal permission decision caching.
//!
//! Every principal gets its own named cache (`<prefix>_<user id>`) mapping
//! `(domain entity id, permission mask)` to the computed decision. Caches are
//! created lazily and invalidated in bulk by name prefix: any change to ACL
//! structure, entries or inheritance clears all of them. There is no
//! per-entry invalidation.
//!
//! # Architecture
//!
//! Each [`HasPermissionCache`] wraps a Moka async cache. Writes go through a
//! striped per-key lock held only around the `insert`, never across the
//! decision computation, so two racing misses may both compute the same
//! decision before the cache converges.
//!
//! The registry keeps an invalidation generation. A caller that read the
//! generation before computing a decision stores it only if no invalidation
//! happened in between, so a decision computed against old ACL data never
//! outlives the invalidation that should have removed it.
//!
//! # Example
//!
//! ```rust,ignore
//! use racl_domain::cache::{HasPermissionCacheKey, PermissionCacheConfig, PermissionCacheRegistry};
//!
//! let registry = PermissionCacheRegistry::new(PermissionCacheConfig::default());
//! let cache = registry.cache_for("alice");
//! let key = HasPermissionCacheKey::new(42, 1);
//! cache.put(key, true).await;
//!
//! assert_eq!(cache.get(&key).await, Some(true));
//! registry.invalidate_all();
//! assert_eq!(cache.get(&key).await, None);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::debug;

/// Number of lock stripes guarding cache writes.
const KEY_LOCK_STRIPES: usize = 64;

/// Configuration for permission caches.
#[derive(Debug, Clone)]
pub struct PermissionCacheConfig {
    /// Prefix of every per-principal cache name.
    pub name_prefix: String,
    /// Maximum number of decisions held per principal.
    pub max_capacity: u64,
    /// Optional TTL. `None` keeps decisions until the next bulk invalidation.
    pub time_to_live: Option<Duration>,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            name_prefix: "racl.HasPermissionCache".to_string(),
            max_capacity: 10_000,
            time_to_live: None,
        }
    }
}

impl PermissionCacheConfig {
    /// Sets the cache name prefix.
    pub fn with_name_prefix(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = name_prefix.into();
        self
    }

    /// Sets the maximum capacity per principal.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets a TTL for cached decisions.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// Cache key for one permission decision of one principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HasPermissionCacheKey {
    pub domain_entity_id: i64,
    pub mask: u32,
}

impl HasPermissionCacheKey {
    pub fn new(domain_entity_id: i64, mask: u32) -> Self {
        Self {
            domain_entity_id,
            mask,
        }
    }

    fn stripe(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % KEY_LOCK_STRIPES
    }
}

/// Permission decisions of a single principal.
pub struct HasPermissionCache {
    name: String,
    decisions: Cache<HasPermissionCacheKey, bool>,
    key_locks: Vec<Mutex<()>>,
}

impl std::fmt::Debug for HasPermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HasPermissionCache")
            .field("name", &self.name)
            .field("entry_count", &self.decisions.entry_count())
            .finish()
    }
}

impl HasPermissionCache {
    fn new(name: String, config: &PermissionCacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);
        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }
        Self {
            name,
            decisions: builder.build(),
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Name of this cache (`<prefix>_<user id>`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retrieves a cached decision.
    ///
    /// # Metrics
    ///
    /// Records hit/miss to:
    /// - `racl_permission_cache_hits_total`
    /// - `racl_permission_cache_misses_total`
    pub async fn get(&self, key: &HasPermissionCacheKey) -> Option<bool> {
        let result = self.decisions.get(key).await;
        if result.is_some() {
            metrics::counter!("racl_permission_cache_hits_total").increment(1);
        } else {
            metrics::counter!("racl_permission_cache_misses_total").increment(1);
        }
        result
    }

    /// Stores a decision under the key's write lock.
    pub async fn put(&self, key: HasPermissionCacheKey, allowed: bool) {
        let _guard = self.key_locks[key.stripe()].lock().await;
        self.decisions.insert(key, allowed).await;
    }

    /// Stores a decision under the key's write lock unless `is_stale` holds,
    /// checked both before and after the insert. A decision that went stale
    /// during the insert is removed again. Returns whether it was kept.
    async fn put_unless_stale<F>(&self, key: HasPermissionCacheKey, allowed: bool, is_stale: F) -> bool
    where
        F: Fn() -> bool,
    {
        let _guard = self.key_locks[key.stripe()].lock().await;
        if is_stale() {
            return false;
        }
        self.decisions.insert(key, allowed).await;
        if is_stale() {
            self.decisions.invalidate(&key).await;
            return false;
        }
        true
    }

    /// Drops every cached decision of this principal.
    pub fn clear(&self) {
        self.decisions.invalidate_all();
    }

    /// Returns the approximate number of cached decisions.
    pub fn entry_count(&self) -> u64 {
        self.decisions.entry_count()
    }

    /// Runs pending maintenance tasks (evictions, counters).
    pub async fn run_pending_tasks(&self) {
        self.decisions.run_pending_tasks().await;
    }
}

/// Named per-principal caches sharing a common name prefix.
#[derive(Debug)]
pub struct PermissionCacheRegistry {
    config: PermissionCacheConfig,
    name_prefix: OnceLock<String>,
    caches: DashMap<String, Arc<HasPermissionCache>>,
    generation: AtomicU64,
}

impl PermissionCacheRegistry {
    pub fn new(config: PermissionCacheConfig) -> Self {
        Self {
            config,
            name_prefix: OnceLock::new(),
            caches: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the configuration for this registry.
    pub fn config(&self) -> &PermissionCacheConfig {
        &self.config
    }

    /// Cache name prefix, memoized on first use.
    pub fn name_prefix(&self) -> &str {
        self.name_prefix
            .get_or_init(|| self.config.name_prefix.clone())
    }

    /// Name of the cache holding `user_id`'s decisions.
    pub fn cache_name(&self, user_id: &str) -> String {
        format!("{}_{}", self.name_prefix(), user_id)
    }

    /// Returns `user_id`'s cache, creating it on first use.
    pub fn cache_for(&self, user_id: &str) -> Arc<HasPermissionCache> {
        let name = self.cache_name(user_id);
        if let Some(cache) = self.caches.get(&name) {
            return Arc::clone(cache.value());
        }
        // The entry API re-checks under the shard lock, so concurrent first
        // users of a principal end up sharing one cache.
        let cache = self.caches.entry(name.clone()).or_insert_with(|| {
            debug!(cache = %name, "creating permission cache");
            Arc::new(HasPermissionCache::new(name.clone(), &self.config))
        });
        Arc::clone(cache.value())
    }

    /// Number of per-principal caches created so far.
    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores `allowed` in `user_id`'s cache unless an invalidation happened
    /// since `generation` was read. Returns whether the decision was stored.
    pub async fn put_if_current(
        &self,
        user_id: &str,
        key: HasPermissionCacheKey,
        allowed: bool,
        generation: u64,
    ) -> bool {
        let stored = self
            .cache_for(user_id)
            .put_unless_stale(key, allowed, || self.generation() != generation)
            .await;
        if !stored {
            debug!(user_id, "skipping cache put after concurrent invalidation");
        }
        stored
    }

    /// Clears every cache whose name starts with `prefix`.
    pub fn clear_all_starting_with(&self, prefix: &str) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut cleared = 0;
        for cache in self.caches.iter() {
            if cache.key().starts_with(prefix) {
                cache.value().clear();
                cleared += 1;
            }
        }
        cleared
    }

    /// Clears the caches of every principal.
    pub fn invalidate_all(&self) {
        let cleared = self.clear_all_starting_with(self.name_prefix());
        debug!(cleared, "invalidated permission caches");
    }
}

/// Registers permission cache metrics descriptions.
///
/// Call this function once during application startup. This is optional but
/// provides better documentation in Prometheus/Grafana.
///
/// # Metrics Registered
///
/// - `racl_permission_cache_hits_total` - Total number of permission cache hits
/// - `racl_permission_cache_misses_total` - Total number of permission cache misses
/// - `racl_notifications_sent_total` - Total number of outbound change notifications
pub fn register_permission_cache_metrics() {
    metrics::describe_counter!(
        "racl_permission_cache_hits_total",
        "Total number of permission cache hits"
    );
    metrics::describe_counter!(
        "racl_permission_cache_misses_total",
        "Total number of permission cache misses"
    );
    metrics::describe_counter!(
        "racl_notifications_sent_total",
        "Total number of outbound domain entity change notifications"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PermissionCacheRegistry {
        PermissionCacheRegistry::new(PermissionCacheConfig::default().with_name_prefix("test"))
    }

    // ============================================================
    // Section 1: Naming
    // ============================================================

    #[test]
    fn test_cache_name_is_prefix_and_user() {
        let registry = registry();
        assert_eq!(registry.name_prefix(), "test");
        assert_eq!(registry.cache_name("alice"), "test_alice");
    }

    #[tokio::test]
    async fn test_cache_for_returns_same_instance() {
        let registry = registry();

        let first = registry.cache_for("alice");
        let second = registry.cache_for("alice");
        let other = registry.cache_for("bob");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.name(), "test_alice");
        assert_eq!(registry.cache_count(), 2);
    }

    // ============================================================
    // Section 2: Get / put
    // ============================================================

    #[tokio::test]
    async fn test_miss_then_hit() {
        let registry = registry();
        let cache = registry.cache_for("alice");
        let key = HasPermissionCacheKey::new(42, 1);

        assert_eq!(cache.get(&key).await, None);
        cache.put(key, true).await;
        assert_eq!(cache.get(&key).await, Some(true));
    }

    #[tokio::test]
    async fn test_negative_decisions_are_cached() {
        let registry = registry();
        let cache = registry.cache_for("alice");
        let key = HasPermissionCacheKey::new(42, 2);

        cache.put(key, false).await;

        assert_eq!(cache.get(&key).await, Some(false));
    }

    #[tokio::test]
    async fn test_principals_are_isolated() {
        let registry = registry();
        let key = HasPermissionCacheKey::new(1, 1);

        registry.cache_for("alice").put(key, true).await;

        assert_eq!(registry.cache_for("bob").get(&key).await, None);
    }

    #[tokio::test]
    async fn test_mask_is_part_of_the_key() {
        let registry = registry();
        let cache = registry.cache_for("alice");

        cache.put(HasPermissionCacheKey::new(1, 1), true).await;

        assert_eq!(cache.get(&HasPermissionCacheKey::new(1, 2)).await, None);
    }

    // ============================================================
    // Section 3: Invalidation
    // ============================================================

    #[tokio::test]
    async fn test_invalidate_all_clears_every_principal() {
        let registry = registry();
        let key = HasPermissionCacheKey::new(7, 1);
        registry.cache_for("alice").put(key, true).await;
        registry.cache_for("bob").put(key, false).await;

        registry.invalidate_all();

        assert_eq!(registry.cache_for("alice").get(&key).await, None);
        assert_eq!(registry.cache_for("bob").get(&key).await, None);
    }

    #[tokio::test]
    async fn test_clear_by_prefix_only_touches_matching_names() {
        let registry = registry();
        let key = HasPermissionCacheKey::new(7, 1);
        registry.cache_for("alice").put(key, true).await;
        registry.cache_for("bob").put(key, true).await;

        let cleared = registry.clear_all_starting_with("test_al");

        assert_eq!(cleared, 1);
        assert_eq!(registry.cache_for("alice").get(&key).await, None);
        assert_eq!(registry.cache_for("bob").get(&key).await, Some(true));
    }

    #[tokio::test]
    async fn test_put_after_invalidation_is_dropped() {
        let registry = registry();
        let key = HasPermissionCacheKey::new(7, 1);
        let generation = registry.generation();

        registry.invalidate_all();
        let stored = registry.put_if_current("alice", key, true, generation).await;

        assert!(!stored);
        assert_eq!(registry.cache_for("alice").get(&key).await, None);
    }

    #[tokio::test]
    async fn test_put_without_invalidation_is_stored() {
        let registry = registry();
        let key = HasPermissionCacheKey::new(7, 1);
        let generation = registry.generation();

        let stored = registry.put_if_current("alice", key, true, generation).await;

        assert!(stored);
        assert_eq!(registry.cache_for("alice").get(&key).await, Some(true));
    }

    #[tokio::test]
    async fn test_cache_usable_after_invalidation() {
        let registry = registry();
        let cache = registry.cache_for("alice");
        let key = HasPermissionCacheKey::new(7, 1);
        cache.put(key, true).await;

        registry.invalidate_all();
        cache.put(key, false).await;

        assert_eq!(cache.get(&key).await, Some(false));
    }

    #[tokio::test]
    async fn test_entries_expire_with_ttl() {
        let registry = PermissionCacheRegistry::new(
            PermissionCacheConfig::default().with_ttl(Duration::from_millis(50)),
        );
        let cache = registry.cache_for("alice");
        let key = HasPermissionCacheKey::new(1, 1);
        cache.put(key, true).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.run_pending_tasks().await;

        assert_eq!(cache.get(&key).await, None);
    }

    // ============================================================
    // Section 4: Concurrency
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_cache() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.cache_for("alice") }));
        }

        let mut caches = Vec::new();
        for handle in handles {
            caches.push(handle.await.unwrap());
        }

        assert_eq!(registry.cache_count(), 1);
        assert!(caches.iter().all(|c| Arc::ptr_eq(c, &caches[0])));
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_one_key_converge() {
        let registry = Arc::new(registry());
        let cache = registry.cache_for("alice");
        let key = HasPermissionCacheKey::new(3, 1);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.put(key, true).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.get(&key).await, Some(true));
    }

    #[tokio::test]
    async fn test_invalidation_while_put_waits_on_key_lock_drops_the_put() {
        let registry = Arc::new(registry());
        let cache = registry.cache_for("alice");
        let key = HasPermissionCacheKey::new(9, 1);
        let generation = registry.generation();

        // Another writer holds the key's stripe.
        let guard = cache.key_locks[key.stripe()].lock().await;
        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.put_if_current("alice", key, true, generation).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        registry.invalidate_all();
        drop(guard);

        assert!(!pending.await.unwrap());
        assert_eq!(cache.get(&key).await, None);
    }
}
