//! racl-domain: Core ACL coordination logic
//!
//! This crate contains the ACL engine including:
//! - SID and domain entity class registries
//! - Domain entity tree mutations with root-then-target locking
//! - Entry template and entry lifecycle batched through a modification context
//! - Modification listeners (veto, transform, react)
//! - Per-principal permission decision caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                racl-domain                   │
//! ├─────────────────────────────────────────────┤
//! │  service/    - AclService & AclOperation    │
//! │  context/    - Modification context         │
//! │  listener/   - Modification listeners       │
//! │  cache/      - Permission decision caching  │
//! │  model/      - Masks & class hierarchy      │
//! │  notify.rs   - Change notifications         │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod listener;
pub mod model;
pub mod notify;
pub mod service;
pub mod user_context;

// Re-export commonly used types at the crate root
pub use cache::{
    register_permission_cache_metrics, HasPermissionCache, HasPermissionCacheKey,
    PermissionCacheConfig, PermissionCacheRegistry,
};
pub use context::{AclModification, AclModificationContext};
pub use error::{AclError, AclResult, ListenerError, ListenerResult};
pub use listener::{
    AclModificationListener, AclModificationListenerRegister, PermissionCacheInvalidator,
};
pub use model::{EntityClassHierarchy, EntityType, PermissionMask};
pub use notify::{AclNotification, AclNotifier, ChannelNotifier, NoopNotifier, NotifyError};
pub use service::{AclOperation, AclService, AclServiceConfig};
pub use user_context::{current_user, with_current_user};
