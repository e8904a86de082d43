//! SID and domain entity class registries.
//!
//! Both create rows lazily. Creation runs in a dedicated short transaction
//! that first locks a well-known row (the system administrator SID, the root
//! class) so concurrent first uses of the same key create exactly one row.

use racl_storage::{AclDomainEntityClass, AclPermission, AclSid};
use tracing::{debug, instrument};

use super::AclService;
use crate::error::{AclError, AclResult};
use crate::model::EntityType;

impl AclService {
    /// Returns the principal SID of `user_id`, creating it on first use.
    #[instrument(skip(self))]
    pub async fn principal_sid(&self, user_id: &str) -> AclResult<AclSid> {
        if let Some(sid) = self.lookups.sids.get(user_id).await {
            return Ok(sid);
        }

        let mut tx = self.store.begin().await?;
        let admin = &self.config.system_administrator;
        if tx.get_sid_for_update(admin, true).await?.is_none() {
            return Err(AclError::configuration(format!(
                "system administrator SID '{admin}' not found"
            )));
        }
        let sid = match tx.get_sid(user_id, true).await? {
            Some(sid) => sid,
            None => {
                let sid = tx.create_sid(user_id, true).await?;
                debug!(sid_id = sid.id, "created principal SID");
                sid
            }
        };
        tx.commit().await?;

        self.lookups
            .sids
            .insert(user_id.to_string(), sid.clone())
            .await;
        Ok(sid)
    }

    /// Returns the class named `class_name`, creating it on first use.
    #[instrument(skip(self))]
    pub async fn domain_entity_class(&self, class_name: &str) -> AclResult<AclDomainEntityClass> {
        if let Some(class) = self.lookups.classes.get(class_name).await {
            return Ok(class);
        }

        let mut tx = self.store.begin().await?;
        let root_class = &self.config.root_class;
        if tx.get_class_for_update(root_class).await?.is_none() {
            return Err(AclError::DomainEntityClassNotFound {
                class: root_class.clone(),
            });
        }
        let class = match tx.get_class(class_name).await? {
            Some(class) => class,
            None => {
                let class = tx.create_class(class_name).await?;
                debug!(class_id = class.id, "created domain entity class");
                class
            }
        };
        tx.commit().await?;

        self.remember_class(&class).await;
        Ok(class)
    }

    /// Returns the class with internal id `class_id`.
    pub async fn domain_entity_class_by_id(&self, class_id: i64) -> AclResult<AclDomainEntityClass> {
        if let Some(class) = self.lookups.classes_by_id.get(&class_id).await {
            return Ok(class);
        }

        let mut tx = self.store.begin().await?;
        let class = tx.get_class_by_id(class_id).await?;
        tx.commit().await?;

        let class = class.ok_or(AclError::DomainEntityClassIdNotFound { id: class_id })?;
        self.remember_class(&class).await;
        Ok(class)
    }

    /// Returns the class registered for the Rust type `T`.
    pub async fn domain_entity_class_of<T: EntityType>(&self) -> AclResult<AclDomainEntityClass> {
        self.domain_entity_class(T::CLASS_NAME).await
    }

    /// Returns true if class `child_class_id` is a strict, possibly indirect,
    /// subtype of class `parent_class_id`.
    pub async fn is_child_domain_entity_class(
        &self,
        parent_class_id: i64,
        child_class_id: i64,
    ) -> AclResult<bool> {
        let parent = self.domain_entity_class_by_id(parent_class_id).await?;
        let child = self.domain_entity_class_by_id(child_class_id).await?;
        Ok(self.hierarchy.is_child(&parent.class_name, &child.class_name))
    }

    /// Looks up a permission kind by name.
    pub async fn permission(&self, name: &str) -> AclResult<AclPermission> {
        let mut tx = self.store.begin().await?;
        let permission = tx.find_permission(name).await?;
        tx.commit().await?;
        permission.ok_or_else(|| AclError::PermissionNotFound {
            permission: name.to_string(),
        })
    }

    async fn remember_class(&self, class: &AclDomainEntityClass) {
        self.lookups
            .classes
            .insert(class.class_name.clone(), class.clone())
            .await;
        self.lookups
            .classes_by_id
            .insert(class.id, class.clone())
            .await;
    }
}
