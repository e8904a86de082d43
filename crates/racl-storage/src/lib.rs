//! racl-storage: Storage abstraction layer
//!
//! This crate provides the storage abstraction for racl, including:
//! - Row types for SIDs, classes, domain entities, permissions, templates and entries
//! - `AclStore` / `StoreTransaction` traits with row-level exclusive locks
//! - In-memory implementation with an undo log
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               racl-storage                   │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - AclStore / StoreTransaction  │
//! │  memory.rs   - In-memory implementation     │
//! │  error.rs    - StorageError                 │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryAclStore, MemoryTransaction};
pub use traits::{
    AclDomainEntity, AclDomainEntityClass, AclEntry, AclEntryTemplate, AclPermission, AclSid,
    AclStore, NewAclDomainEntity, NewAclEntry, NewAclEntryTemplate, StoreTransaction,
};
