//! Configuration management for the racl engine.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use racl_server::config::AclServerConfig;
//!
//! // Load from file with env overrides
//! let config = AclServerConfig::load("racl.yaml")?;
//!
//! // Or load from environment only
//! let config = AclServerConfig::from_env()?;
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use racl_domain::{AclServiceConfig, EntityClassHierarchy, PermissionCacheConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix: `RACL_ACL__ROOT_CLASS` overrides `acl.root_class`.
pub const ENV_PREFIX: &str = "RACL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AclServerConfig {
    /// Engine settings
    #[serde(default)]
    pub acl: AclSettings,

    /// Lookup and permission cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Engine settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// acl:
///   system_administrator: admin
///   root_class: racl.RootEntity
///   root_entity_id: 1
///   class_hierarchy:
///     - class: app.Document
///       parent: app.Node
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AclSettings {
    /// SID of the system administrator
    #[serde(default = "default_system_administrator")]
    pub system_administrator: String,

    /// Owner of new domain entities. Falls back to the system administrator.
    #[serde(default)]
    pub default_owner: Option<String>,

    /// Class of the root domain entity
    #[serde(default = "default_root_class")]
    pub root_class: String,

    /// External id of the root domain entity
    #[serde(default = "default_root_entity_id")]
    pub root_entity_id: i64,

    /// `entries_inheriting` flag of new domain entities
    #[serde(default = "default_true")]
    pub default_entries_inheriting: bool,

    /// Register the built-in permission cache invalidator
    #[serde(default = "default_true")]
    pub register_cache_invalidator: bool,

    /// Subtype declarations for domain entity classes.
    ///
    /// Class names contain dots, so they are listed rather than used as keys.
    #[serde(default)]
    pub class_hierarchy: Vec<ClassDeclaration>,
}

impl Default for AclSettings {
    fn default() -> Self {
        Self {
            system_administrator: default_system_administrator(),
            default_owner: None,
            root_class: default_root_class(),
            root_entity_id: default_root_entity_id(),
            default_entries_inheriting: true,
            register_cache_invalidator: true,
            class_hierarchy: Vec::new(),
        }
    }
}

/// `class` is a direct subtype of `parent`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClassDeclaration {
    pub class: String,
    pub parent: String,
}

fn default_system_administrator() -> String {
    "admin".to_string()
}

fn default_root_class() -> String {
    "racl.RootEntity".to_string()
}

fn default_root_entity_id() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Prefix of the per-principal permission cache names
    #[serde(default = "default_permission_cache_prefix")]
    pub permission_cache_prefix: String,

    /// Maximum decisions cached per principal
    #[serde(default = "default_cache_capacity")]
    pub permission_cache_capacity: u64,

    /// Optional TTL of cached decisions in seconds
    #[serde(default)]
    pub permission_cache_ttl_secs: Option<u64>,

    /// Capacity of each SID/class/domain entity lookup cache
    #[serde(default = "default_cache_capacity")]
    pub lookup_cache_capacity: u64,

    /// Optional TTL of the lookup caches in seconds
    #[serde(default)]
    pub lookup_cache_ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            permission_cache_prefix: default_permission_cache_prefix(),
            permission_cache_capacity: default_cache_capacity(),
            permission_cache_ttl_secs: None,
            lookup_cache_capacity: default_cache_capacity(),
            lookup_cache_ttl_secs: None,
        }
    }
}

fn default_permission_cache_prefix() -> String {
    "racl.HasPermissionCache".to_string()
}

fn default_cache_capacity() -> u64 {
    10_000
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type. Only "memory" is available.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// User accounts seeded into the store
    #[serde(default)]
    pub user_accounts: Vec<String>,

    /// Permission kinds seeded into the store
    #[serde(default = "default_permissions")]
    pub permissions: Vec<PermissionDeclaration>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            user_accounts: Vec::new(),
            permissions: default_permissions(),
        }
    }
}

/// A named permission bit set.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PermissionDeclaration {
    pub name: String,
    pub mask: u32,
}

impl PermissionDeclaration {
    fn new(name: &str, mask: u32) -> Self {
        Self {
            name: name.to_string(),
            mask,
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_permissions() -> Vec<PermissionDeclaration> {
    vec![
        PermissionDeclaration::new("read", 1),
        PermissionDeclaration::new("write", 2),
        PermissionDeclaration::new("create", 4),
        PermissionDeclaration::new("delete", 8),
        PermissionDeclaration::new("administration", 16),
    ]
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,

    /// Log span open/close events
    #[serde(default)]
    pub include_spans: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            include_spans: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigLoadError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl AclServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `RACL_` and use `__` as separator.
    /// For example:
    /// - `RACL_ACL__SYSTEM_ADMINISTRATOR=root` overrides `acl.system_administrator`
    /// - `RACL_CACHE__PERMISSION_CACHE_CAPACITY=500` overrides `cache.permission_cache_capacity`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&AclServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let acl_config: AclServerConfig = config.try_deserialize()?;
        acl_config.validate()?;

        Ok(acl_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AclServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let acl_config: AclServerConfig = config.try_deserialize()?;
        acl_config.validate()?;

        Ok(acl_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.acl.system_administrator.trim().is_empty() {
            return Err(ConfigLoadError::invalid(
                "acl.system_administrator must not be empty",
            ));
        }
        if self
            .acl
            .default_owner
            .as_deref()
            .is_some_and(|owner| owner.trim().is_empty())
        {
            return Err(ConfigLoadError::invalid(
                "acl.default_owner must not be empty when set",
            ));
        }
        if self.acl.root_class.trim().is_empty() {
            return Err(ConfigLoadError::invalid("acl.root_class must not be empty"));
        }
        for declaration in &self.acl.class_hierarchy {
            if declaration.class == self.acl.root_class {
                return Err(ConfigLoadError::invalid(format!(
                    "acl.class_hierarchy cannot declare the root class '{}'",
                    declaration.class
                )));
            }
            if declaration.class == declaration.parent {
                return Err(ConfigLoadError::invalid(format!(
                    "acl.class_hierarchy: '{}' cannot be its own parent",
                    declaration.class
                )));
            }
        }

        if self.cache.permission_cache_prefix.trim().is_empty() {
            return Err(ConfigLoadError::invalid(
                "cache.permission_cache_prefix must not be empty",
            ));
        }
        if self.cache.permission_cache_capacity == 0 {
            return Err(ConfigLoadError::invalid(
                "cache.permission_cache_capacity must be greater than 0",
            ));
        }
        if self.cache.lookup_cache_capacity == 0 {
            return Err(ConfigLoadError::invalid(
                "cache.lookup_cache_capacity must be greater than 0",
            ));
        }

        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::invalid(format!(
                "storage.backend must be one of: {:?}, got: {}",
                valid_backends, self.storage.backend
            )));
        }
        for permission in &self.storage.permissions {
            if permission.name.trim().is_empty() {
                return Err(ConfigLoadError::invalid(
                    "storage.permissions: name must not be empty",
                ));
            }
            if permission.mask == 0 {
                return Err(ConfigLoadError::invalid(format!(
                    "storage.permissions: mask of '{}' must be non-zero",
                    permission.name
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    /// Engine configuration derived from the `acl` and `cache` sections.
    pub fn to_service_config(&self) -> AclServiceConfig {
        let mut permission_cache = PermissionCacheConfig::default()
            .with_name_prefix(self.cache.permission_cache_prefix.clone())
            .with_max_capacity(self.cache.permission_cache_capacity);
        if let Some(secs) = self.cache.permission_cache_ttl_secs {
            permission_cache = permission_cache.with_ttl(Duration::from_secs(secs));
        }

        let acl = &self.acl;
        let default_owner = acl
            .default_owner
            .clone()
            .unwrap_or_else(|| acl.system_administrator.clone());

        AclServiceConfig::default()
            .with_system_administrator(acl.system_administrator.clone())
            .with_default_owner(default_owner)
            .with_root(acl.root_class.clone(), acl.root_entity_id)
            .with_default_entries_inheriting(acl.default_entries_inheriting)
            .with_cache_invalidator(acl.register_cache_invalidator)
            .with_lookup_cache(
                self.cache.lookup_cache_capacity,
                self.cache.lookup_cache_ttl_secs.map(Duration::from_secs),
            )
            .with_permission_cache(permission_cache)
    }

    /// Class hierarchy declared in `acl.class_hierarchy`.
    pub fn class_hierarchy(&self) -> EntityClassHierarchy {
        let hierarchy = EntityClassHierarchy::new();
        for declaration in &self.acl.class_hierarchy {
            hierarchy.declare(declaration.class.clone(), declaration.parent.clone());
        }
        hierarchy
    }
}

fn environment() -> Environment {
    // `__` separates nested keys: RACL_ACL__ROOT_CLASS -> acl.root_class
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
