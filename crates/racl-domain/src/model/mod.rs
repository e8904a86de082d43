//! ACL model types.
//!
//! Row types are owned by the storage layer and re-exported here so callers
//! only need this crate.

mod hierarchy;
mod permission;

pub use hierarchy::{EntityClassHierarchy, EntityType};
pub use permission::PermissionMask;
pub use racl_storage::{
    AclDomainEntity, AclDomainEntityClass, AclEntry, AclEntryTemplate, AclPermission, AclSid,
    NewAclDomainEntity, NewAclEntry, NewAclEntryTemplate,
};
