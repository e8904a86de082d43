//! AclStore and StoreTransaction trait definitions.

use async_trait::async_trait;

use crate::error::StorageResult;

/// A security identity: a principal (user) or a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclSid {
    pub id: i64,
    /// External identifier (user id or group name).
    pub sid: String,
    pub principal: bool,
}

/// The type of a protected domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclDomainEntityClass {
    pub id: i64,
    /// Fully qualified type name, unique.
    pub class_name: String,
}

/// One node of the ACL tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclDomainEntity {
    pub id: i64,
    pub class_id: i64,
    /// Identifier of the protected object within its class.
    pub entity_id: i64,
    /// `None` only for the root node.
    pub parent_id: Option<i64>,
    pub owner_sid_id: i64,
    pub entries_inheriting: bool,
}

/// Column values for a domain entity that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAclDomainEntity {
    pub class_id: i64,
    pub entity_id: i64,
    pub parent_id: Option<i64>,
    pub owner_sid_id: i64,
    pub entries_inheriting: bool,
}

/// A named permission kind and its bit mask.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclPermission {
    pub id: i64,
    pub name: String,
    pub mask: u32,
}

/// A reusable grant definition bound to a domain entity and a permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclEntryTemplate {
    pub id: i64,
    pub domain_entity_id: i64,
    pub permission_id: i64,
    pub granting: bool,
}

/// Column values for an entry template that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAclEntryTemplate {
    pub domain_entity_id: i64,
    pub permission_id: i64,
    pub granting: bool,
}

/// A concrete grant of a permission on a domain entity to a SID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclEntry {
    pub id: i64,
    pub domain_entity_id: i64,
    pub sid_id: i64,
    pub permission_id: i64,
    pub granting: bool,
    pub entry_template_id: i64,
}

/// Column values for an entry that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewAclEntry {
    pub domain_entity_id: i64,
    pub sid_id: i64,
    pub permission_id: i64,
    pub granting: bool,
    pub entry_template_id: i64,
}

/// Entry point of a durable ACL store.
///
/// Implementations must be thread-safe (Send + Sync). All reads and writes
/// happen through a [`StoreTransaction`].
#[async_trait]
pub trait AclStore: Send + Sync + 'static {
    /// Opens a new transaction.
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;
}

/// A single database transaction.
///
/// `*_for_update` methods take an exclusive row lock that is held until the
/// transaction commits or rolls back. Locking a row the transaction already
/// holds returns immediately. A transaction dropped without `commit` is
/// rolled back.
#[async_trait]
pub trait StoreTransaction: Send {
    // SID operations

    async fn get_sid(&mut self, sid: &str, principal: bool) -> StorageResult<Option<AclSid>>;

    async fn get_sid_for_update(
        &mut self,
        sid: &str,
        principal: bool,
    ) -> StorageResult<Option<AclSid>>;

    async fn create_sid(&mut self, sid: &str, principal: bool) -> StorageResult<AclSid>;

    // Domain entity class operations

    async fn get_class_by_id(&mut self, id: i64) -> StorageResult<Option<AclDomainEntityClass>>;

    async fn get_class(&mut self, class_name: &str)
        -> StorageResult<Option<AclDomainEntityClass>>;

    async fn get_class_for_update(
        &mut self,
        class_name: &str,
    ) -> StorageResult<Option<AclDomainEntityClass>>;

    async fn create_class(&mut self, class_name: &str) -> StorageResult<AclDomainEntityClass>;

    // Domain entity operations

    async fn get_domain_entity(&mut self, id: i64) -> StorageResult<Option<AclDomainEntity>>;

    async fn get_domain_entity_for_update(
        &mut self,
        id: i64,
    ) -> StorageResult<Option<AclDomainEntity>>;

    /// Finds a domain entity by its class name and external entity id.
    async fn find_domain_entity(
        &mut self,
        class_name: &str,
        entity_id: i64,
    ) -> StorageResult<Option<AclDomainEntity>>;

    async fn find_domain_entity_for_update(
        &mut self,
        class_name: &str,
        entity_id: i64,
    ) -> StorageResult<Option<AclDomainEntity>>;

    async fn create_domain_entity(
        &mut self,
        domain_entity: NewAclDomainEntity,
    ) -> StorageResult<AclDomainEntity>;

    async fn update_domain_entity(&mut self, domain_entity: &AclDomainEntity) -> StorageResult<()>;

    async fn delete_domain_entity(&mut self, id: i64) -> StorageResult<()>;

    // Permission operations

    async fn get_permission(&mut self, id: i64) -> StorageResult<Option<AclPermission>>;

    async fn find_permission(&mut self, name: &str) -> StorageResult<Option<AclPermission>>;

    async fn create_permission(&mut self, name: &str, mask: u32) -> StorageResult<AclPermission>;

    // Entry template operations

    async fn get_entry_template(&mut self, id: i64) -> StorageResult<Option<AclEntryTemplate>>;

    /// Templates bound to the given domain entity for which the SID holds an entry.
    async fn find_entry_templates_by_domain_entity_and_sid(
        &mut self,
        class_name: &str,
        entity_id: i64,
        sid_id: i64,
    ) -> StorageResult<Vec<AclEntryTemplate>>;

    async fn create_entry_template(
        &mut self,
        template: NewAclEntryTemplate,
    ) -> StorageResult<AclEntryTemplate>;

    /// Deletes a template together with every entry derived from it.
    async fn delete_entry_template(&mut self, id: i64) -> StorageResult<()>;

    // Entry operations

    async fn find_entries_by_sid(&mut self, sid_id: i64) -> StorageResult<Vec<AclEntry>>;

    async fn find_entries_by_template(&mut self, template_id: i64)
        -> StorageResult<Vec<AclEntry>>;

    async fn find_entries_by_sid_and_template(
        &mut self,
        sid_id: i64,
        template_id: i64,
    ) -> StorageResult<Vec<AclEntry>>;

    async fn find_entries_by_domain_entity_sid_and_template(
        &mut self,
        class_name: &str,
        entity_id: i64,
        sid_id: i64,
        template_id: i64,
    ) -> StorageResult<Vec<AclEntry>>;

    async fn create_entry(&mut self, entry: NewAclEntry) -> StorageResult<AclEntry>;

    /// Deletes an entry. Deleting an entry that no longer exists is not an error.
    async fn delete_entry(&mut self, id: i64) -> StorageResult<()>;

    // Account operations

    /// Exclusively locks the user account with the given external id.
    ///
    /// Returns `false` if no such account exists.
    async fn lock_user_account(&mut self, user_id: &str) -> StorageResult<bool>;

    // Queries

    /// Decides whether the principal `user_id` holds every bit of `mask` on the
    /// domain entity, following the parent chain while `entries_inheriting` is set.
    async fn has_permission(
        &mut self,
        domain_entity_id: i64,
        user_id: &str,
        mask: u32,
    ) -> StorageResult<bool>;

    // Lifecycle

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
