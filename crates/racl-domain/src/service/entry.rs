//! Entry template and entry lifecycle.
//!
//! Entry grants and revocations lock the acting user's account first, so all
//! changes to one principal's entries are serialized. Changes are staged into
//! the modification context and written when it is flushed.

use racl_storage::{AclEntry, AclEntryTemplate, NewAclEntry, NewAclEntryTemplate};
use tracing::{debug, instrument};

use super::{AclOperation, AclService};
use crate::error::{AclError, AclResult};

impl AclOperation<'_> {
    /// Creates an entry template. Only granting templates are supported.
    pub async fn create_entry_template(
        &mut self,
        template: NewAclEntryTemplate,
    ) -> AclResult<AclEntryTemplate> {
        if !template.granting {
            return Err(AclError::invalid_argument(
                "deny entry templates are not supported",
            ));
        }
        if self
            .tx
            .get_domain_entity(template.domain_entity_id)
            .await?
            .is_none()
        {
            return Err(AclError::DomainEntityIdNotFound {
                id: template.domain_entity_id,
            });
        }
        if self
            .tx
            .get_permission(template.permission_id)
            .await?
            .is_none()
        {
            return Err(AclError::PermissionNotFound {
                permission: format!("id {}", template.permission_id),
            });
        }
        let created = self.tx.create_entry_template(template).await?;
        debug!(template_id = created.id, "created entry template");
        Ok(created)
    }

    /// Stages an entry template and all its entries for deletion.
    pub async fn delete_entry_template(&mut self, template_id: i64) -> AclResult<()> {
        let creator = self.begin_staging();
        self.create_modification_context()
            .stage_entry_template_deletion(template_id);
        self.finish_staging(creator, Ok(())).await
    }

    pub async fn entry_template(&mut self, template_id: i64) -> AclResult<Option<AclEntryTemplate>> {
        Ok(self.tx.get_entry_template(template_id).await?)
    }

    /// Templates on `(class_name, entity_id)` for which `user_id` holds an entry.
    pub async fn entry_templates_by_domain_entity_and_user(
        &mut self,
        class_name: &str,
        entity_id: i64,
        user_id: &str,
    ) -> AclResult<Vec<AclEntryTemplate>> {
        let sid = self.service.principal_sid(user_id).await?;
        Ok(self
            .tx
            .find_entry_templates_by_domain_entity_and_sid(class_name, entity_id, sid.id)
            .await?)
    }

    pub async fn entries_by_user(&mut self, user_id: &str) -> AclResult<Vec<AclEntry>> {
        let sid = self.service.principal_sid(user_id).await?;
        Ok(self.tx.find_entries_by_sid(sid.id).await?)
    }

    pub async fn entries_by_user_and_template(
        &mut self,
        user_id: &str,
        template_id: i64,
    ) -> AclResult<Vec<AclEntry>> {
        let sid = self.service.principal_sid(user_id).await?;
        Ok(self
            .tx
            .find_entries_by_sid_and_template(sid.id, template_id)
            .await?)
    }

    /// Grants `template` to `user_id` on the template's own domain entity.
    #[instrument(skip(self, template), fields(template_id = template.id))]
    pub async fn create_entry(&mut self, template: &AclEntryTemplate, user_id: &str) -> AclResult<()> {
        let creator = self.begin_staging();
        let result = self.stage_entry(None, template.clone(), user_id).await;
        self.finish_staging(creator, result).await
    }

    /// Grants `template`'s permission to `user_id` on `(class_name, entity_id)`.
    #[instrument(skip(self, template), fields(template_id = template.id))]
    pub async fn create_entry_for(
        &mut self,
        class_name: &str,
        entity_id: i64,
        template: &AclEntryTemplate,
        user_id: &str,
    ) -> AclResult<()> {
        let creator = self.begin_staging();
        let result = self
            .stage_entry(Some((class_name, entity_id)), template.clone(), user_id)
            .await;
        self.finish_staging(creator, result).await
    }

    /// Revokes one entry of `template_id` from `user_id`.
    #[instrument(skip(self))]
    pub async fn delete_entry(&mut self, template_id: i64, user_id: &str) -> AclResult<()> {
        let creator = self.begin_staging();
        let result = self
            .stage_entry_deletions(None, template_id, user_id, false)
            .await;
        self.finish_staging(creator, result).await
    }

    /// Revokes every entry of `template_id` from `user_id`.
    #[instrument(skip(self))]
    pub async fn delete_all_entries(&mut self, template_id: i64, user_id: &str) -> AclResult<()> {
        let creator = self.begin_staging();
        let result = self
            .stage_entry_deletions(None, template_id, user_id, true)
            .await;
        self.finish_staging(creator, result).await
    }

    /// Revokes the entry of `template_id` held by `user_id` on `(class_name, entity_id)`.
    #[instrument(skip(self))]
    pub async fn delete_entry_for(
        &mut self,
        class_name: &str,
        entity_id: i64,
        template_id: i64,
        user_id: &str,
    ) -> AclResult<()> {
        let creator = self.begin_staging();
        let result = self
            .stage_entry_deletions(Some((class_name, entity_id)), template_id, user_id, false)
            .await;
        self.finish_staging(creator, result).await
    }

    async fn lock_user_account(&mut self, user_id: &str) -> AclResult<()> {
        self.ensure_entry_changes_allowed()?;
        if self.tx.lock_user_account(user_id).await? {
            Ok(())
        } else {
            Err(AclError::UserNotFound {
                user_id: user_id.to_string(),
            })
        }
    }

    async fn stage_entry(
        &mut self,
        target: Option<(&str, i64)>,
        template: AclEntryTemplate,
        user_id: &str,
    ) -> AclResult<()> {
        self.lock_user_account(user_id).await?;

        let mut template = template;
        for listener in self.service.listeners.snapshot() {
            let transformed = listener
                .before_create_entry(template, user_id)
                .await
                .map_err(|e| AclError::listener(listener.name(), "before_create_entry", e))?;
            match transformed {
                Some(next) => template = next,
                None => {
                    debug!(listener = listener.name(), "entry creation vetoed");
                    return Ok(());
                }
            }
        }

        if self.tx.get_entry_template(template.id).await?.is_none() {
            return Err(AclError::EntryTemplateNotFound { id: template.id });
        }
        let domain_entity = match target {
            Some((class_name, entity_id)) => self.domain_entity(class_name, entity_id).await?,
            None => self.domain_entity_by_id(template.domain_entity_id).await?,
        };
        if self.tx.get_permission(template.permission_id).await?.is_none() {
            return Err(AclError::PermissionNotFound {
                permission: format!("id {}", template.permission_id),
            });
        }
        if !template.granting {
            return Err(AclError::invalid_argument("deny entries are not supported"));
        }
        let sid = self.service.principal_sid(user_id).await?;

        self.create_modification_context()
            .stage_entry_creation(NewAclEntry {
                domain_entity_id: domain_entity.id,
                sid_id: sid.id,
                permission_id: template.permission_id,
                granting: template.granting,
                entry_template_id: template.id,
            });
        debug!(domain_entity_id = domain_entity.id, "staged entry creation");
        Ok(())
    }

    async fn stage_entry_deletions(
        &mut self,
        target: Option<(&str, i64)>,
        template_id: i64,
        user_id: &str,
        all: bool,
    ) -> AclResult<()> {
        self.lock_user_account(user_id).await?;

        for listener in self.service.listeners.snapshot() {
            let proceed = listener
                .before_delete_entry(template_id, user_id)
                .await
                .map_err(|e| AclError::listener(listener.name(), "before_delete_entry", e))?;
            if !proceed {
                debug!(listener = listener.name(), "entry deletion vetoed");
                return Ok(());
            }
        }

        let sid = self.service.principal_sid(user_id).await?;
        let mut entries = match target {
            Some((class_name, entity_id)) => {
                self.tx
                    .find_entries_by_domain_entity_sid_and_template(
                        class_name,
                        entity_id,
                        sid.id,
                        template_id,
                    )
                    .await?
            }
            None => {
                self.tx
                    .find_entries_by_sid_and_template(sid.id, template_id)
                    .await?
            }
        };
        if entries.is_empty() {
            // Already revoked by someone else.
            return Ok(());
        }
        if !all {
            entries.truncate(1);
        }

        let context = self.create_modification_context();
        for entry in entries {
            context.stage_entry_deletion(entry);
        }
        Ok(())
    }
}

/// Read-only entry lookups, each in its own short unit of work.
impl AclService {
    pub async fn entry_template(&self, template_id: i64) -> AclResult<Option<AclEntryTemplate>> {
        let mut op = self.begin().await?;
        let template = op.entry_template(template_id).await?;
        op.commit().await?;
        Ok(template)
    }

    pub async fn entry_templates_by_domain_entity_and_user(
        &self,
        class_name: &str,
        entity_id: i64,
        user_id: &str,
    ) -> AclResult<Vec<AclEntryTemplate>> {
        let mut op = self.begin().await?;
        let templates = op
            .entry_templates_by_domain_entity_and_user(class_name, entity_id, user_id)
            .await?;
        op.commit().await?;
        Ok(templates)
    }

    pub async fn entries_by_user(&self, user_id: &str) -> AclResult<Vec<AclEntry>> {
        let mut op = self.begin().await?;
        let entries = op.entries_by_user(user_id).await?;
        op.commit().await?;
        Ok(entries)
    }

    pub async fn entries_by_user_and_template(
        &self,
        user_id: &str,
        template_id: i64,
    ) -> AclResult<Vec<AclEntry>> {
        let mut op = self.begin().await?;
        let entries = op
            .entries_by_user_and_template(user_id, template_id)
            .await?;
        op.commit().await?;
        Ok(entries)
    }
}
