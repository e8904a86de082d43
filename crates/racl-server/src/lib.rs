//! racl-server: configuration, logging and bootstrap
//!
//! Wires an [`AclService`] from an [`AclServerConfig`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               racl-server                   │
//! ├─────────────────────────────────────────────┤
//! │  config.rs   - Layered configuration        │
//! │  logging.rs  - tracing-subscriber setup     │
//! │  lib.rs      - Store seeding and wiring     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = AclServerConfig::load("racl.yaml")?;
//! init_logging(&config.logging)?;
//! let runtime = bootstrap(&config)?;
//! ```

pub mod config;
pub mod logging;

use std::sync::Arc;

use racl_domain::{register_permission_cache_metrics, AclNotification, AclService, ChannelNotifier};
use racl_storage::{AclDomainEntity, MemoryAclStore};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

pub use config::{AclServerConfig, ConfigLoadError};
pub use logging::init_logging;

/// A running engine over the in-memory store.
#[derive(Debug)]
pub struct AclRuntime {
    pub service: Arc<AclService>,
    pub store: MemoryAclStore,
    /// Notifications sent after each committed change.
    pub notifications: UnboundedReceiver<AclNotification>,
    pub root: AclDomainEntity,
}

/// Validates `config`, seeds an in-memory store and builds the service.
///
/// Seeding creates the system administrator SID, the root class and root
/// domain entity, the configured user accounts and permission kinds.
pub fn bootstrap(config: &AclServerConfig) -> Result<AclRuntime, ConfigLoadError> {
    config.validate()?;

    let acl = &config.acl;
    let store = MemoryAclStore::new();
    let root = store.bootstrap(&acl.system_administrator, &acl.root_class, acl.root_entity_id);
    for user_id in &config.storage.user_accounts {
        store.add_user_account(user_id);
    }
    if let Some(owner) = &acl.default_owner {
        store.add_user_account(owner);
    }
    for permission in &config.storage.permissions {
        store.add_permission(&permission.name, permission.mask);
    }

    register_permission_cache_metrics();

    let (notifier, notifications) = ChannelNotifier::channel();
    let service = AclService::new(
        Arc::new(store.clone()),
        Arc::new(notifier),
        config.to_service_config(),
    )
    .with_hierarchy(Arc::new(config.class_hierarchy()));

    info!(
        backend = %config.storage.backend,
        root_id = root.id,
        accounts = config.storage.user_accounts.len(),
        permissions = config.storage.permissions.len(),
        "bootstrapped ACL service"
    );

    Ok(AclRuntime {
        service: Arc::new(service),
        store,
        notifications,
        root,
    })
}
