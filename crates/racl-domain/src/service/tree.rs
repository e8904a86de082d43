//! Domain entity tree mutations and lookups.

use racl_storage::{AclDomainEntity, NewAclDomainEntity};
use tracing::{info, instrument};

use super::{AclOperation, AfterCommit};
use crate::error::{AclError, AclResult};
use crate::notify::AclNotification;

impl AclOperation<'_> {
    /// Creates the node `(class_name, entity_id)` under `parent` (or the root),
    /// or moves an existing node to that parent.
    ///
    /// Moving a node to the parent it already has changes nothing.
    #[instrument(skip(self))]
    pub async fn update_or_create_domain_entity(
        &mut self,
        class_name: &str,
        entity_id: i64,
        parent: Option<(&str, i64)>,
    ) -> AclResult<AclDomainEntity> {
        if class_name == self.service.config.root_class {
            return Err(AclError::invalid_argument(format!(
                "the root class '{class_name}' cannot be used for domain entities"
            )));
        }

        let root = self.lock_root().await?;
        let parent = match parent {
            Some((parent_class, parent_entity_id)) => self
                .tx
                .find_domain_entity(parent_class, parent_entity_id)
                .await?
                .ok_or_else(|| AclError::DomainEntityNotFound {
                    class: parent_class.to_string(),
                    entity_id: parent_entity_id,
                })?,
            None => root,
        };

        let Some(mut domain_entity) = self
            .tx
            .find_domain_entity_for_update(class_name, entity_id)
            .await?
        else {
            return self.create_domain_entity(class_name, entity_id, &parent).await;
        };

        let previous_parent_id = domain_entity.parent_id;
        if previous_parent_id == Some(parent.id) {
            return Ok(domain_entity);
        }
        self.ensure_not_ancestor(domain_entity.id, &parent).await?;

        domain_entity.parent_id = Some(parent.id);
        self.note_permission_relevant_write();
        self.tx.update_domain_entity(&domain_entity).await?;
        info!(
            domain_entity_id = domain_entity.id,
            ?previous_parent_id,
            new_parent_id = parent.id,
            "moved domain entity"
        );

        for listener in self.service.listeners.snapshot() {
            listener
                .after_domain_entity_parent_change(domain_entity.id, previous_parent_id, parent.id)
                .await
                .map_err(|e| {
                    AclError::listener(listener.name(), "after_domain_entity_parent_change", e)
                })?;
        }

        self.after_commit(AfterCommit::Notify(AclNotification::DomainEntitiesModified(
            vec![domain_entity.id],
        )));
        Ok(domain_entity)
    }

    async fn create_domain_entity(
        &mut self,
        class_name: &str,
        entity_id: i64,
        parent: &AclDomainEntity,
    ) -> AclResult<AclDomainEntity> {
        let class = self.service.domain_entity_class(class_name).await?;
        let owner = self
            .service
            .principal_sid(&self.service.config.default_owner)
            .await?;
        let domain_entity = self
            .tx
            .create_domain_entity(NewAclDomainEntity {
                class_id: class.id,
                entity_id,
                parent_id: Some(parent.id),
                owner_sid_id: owner.id,
                entries_inheriting: self.service.config.default_entries_inheriting,
            })
            .await?;
        // The new row stays locked until the operation ends.
        self.tx.get_domain_entity_for_update(domain_entity.id).await?;
        info!(
            domain_entity_id = domain_entity.id,
            parent_id = parent.id,
            "created domain entity"
        );

        for listener in self.service.listeners.snapshot() {
            listener
                .after_create_domain_entity(&domain_entity)
                .await
                .map_err(|e| AclError::listener(listener.name(), "after_create_domain_entity", e))?;
        }
        Ok(domain_entity)
    }

    /// Deletes the node `(class_name, entity_id)`.
    ///
    /// The node must no longer be referenced by entries or entry templates.
    #[instrument(skip(self))]
    pub async fn delete_domain_entity(&mut self, class_name: &str, entity_id: i64) -> AclResult<()> {
        let root = self.lock_root().await?;
        let domain_entity = self
            .tx
            .find_domain_entity_for_update(class_name, entity_id)
            .await?
            .ok_or_else(|| AclError::DomainEntityNotFound {
                class: class_name.to_string(),
                entity_id,
            })?;
        if domain_entity.id == root.id {
            return Err(AclError::invalid_argument("the root domain entity cannot be deleted"));
        }

        for listener in self.service.listeners.snapshot() {
            listener
                .before_delete_domain_entity(&domain_entity)
                .await
                .map_err(|e| {
                    AclError::listener(listener.name(), "before_delete_domain_entity", e)
                })?;
        }

        self.note_permission_relevant_write();
        self.tx.delete_domain_entity(domain_entity.id).await?;
        info!(domain_entity_id = domain_entity.id, "deleted domain entity");

        self.after_commit(AfterCommit::ForgetDomainEntity {
            class_name: class_name.to_string(),
            entity_id,
        });
        self.after_commit(AfterCommit::Notify(AclNotification::DomainEntitiesDeleted(
            vec![domain_entity.id],
        )));
        Ok(())
    }

    pub async fn domain_entity(
        &mut self,
        class_name: &str,
        entity_id: i64,
    ) -> AclResult<AclDomainEntity> {
        self.tx
            .find_domain_entity(class_name, entity_id)
            .await?
            .ok_or_else(|| AclError::DomainEntityNotFound {
                class: class_name.to_string(),
                entity_id,
            })
    }

    pub async fn domain_entity_by_id(&mut self, domain_entity_id: i64) -> AclResult<AclDomainEntity> {
        self.tx
            .get_domain_entity(domain_entity_id)
            .await?
            .ok_or(AclError::DomainEntityIdNotFound {
                id: domain_entity_id,
            })
    }

    /// Exclusively locks the root node. All structural changes go through it.
    async fn lock_root(&mut self) -> AclResult<AclDomainEntity> {
        let config = &self.service.config;
        let root = self
            .tx
            .find_domain_entity_for_update(&config.root_class, config.root_entity_id)
            .await?
            .ok_or_else(|| {
                AclError::configuration(format!(
                    "root domain entity {}#{} not found",
                    config.root_class, config.root_entity_id
                ))
            })?;
        self.mark_root_locked();
        Ok(root)
    }

    /// Rejects moving `domain_entity_id` below itself or one of its descendants.
    async fn ensure_not_ancestor(
        &mut self,
        domain_entity_id: i64,
        new_parent: &AclDomainEntity,
    ) -> AclResult<()> {
        let mut cursor = Some(new_parent.clone());
        while let Some(node) = cursor {
            if node.id == domain_entity_id {
                return Err(AclError::invalid_argument(format!(
                    "domain entity {domain_entity_id} cannot become its own descendant"
                )));
            }
            cursor = match node.parent_id {
                Some(parent_id) => self.tx.get_domain_entity(parent_id).await?,
                None => None,
            };
        }
        Ok(())
    }
}
