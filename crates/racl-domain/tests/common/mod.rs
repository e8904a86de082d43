//! Shared fixtures for racl-domain integration tests.

// Allow dead_code because helpers are used across different test files,
// but each test binary only sees its own usage.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use racl_domain::{
    AclModificationContext, AclModificationListener, AclNotification, AclService,
    AclServiceConfig, ChannelNotifier, EntityClassHierarchy, EntityType, ListenerResult,
};
use racl_storage::{
    AclDomainEntity, AclEntryTemplate, AclPermission, MemoryAclStore, NewAclEntryTemplate,
};

// =============================================================================
// Test Constants
// =============================================================================

pub const ADMIN: &str = "admin";
pub const ROOT_CLASS: &str = "racl.RootEntity";
pub const ROOT_ENTITY_ID: i64 = 1;

pub const FOLDER: &str = "app.Folder";
pub const DOCUMENT: &str = "app.Document";
pub const NODE: &str = "app.Node";

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

pub struct Document;

impl EntityType for Document {
    const CLASS_NAME: &'static str = DOCUMENT;
}

// =============================================================================
// Service fixture
// =============================================================================

/// A bootstrapped in-memory store, a service over it and the notification feed.
pub struct TestAcl {
    pub store: MemoryAclStore,
    pub service: Arc<AclService>,
    pub notifications: UnboundedReceiver<AclNotification>,
    pub root: AclDomainEntity,
    pub read: AclPermission,
    pub write: AclPermission,
}

impl TestAcl {
    /// Notifications delivered so far.
    pub fn drain_notifications(&mut self) -> Vec<AclNotification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            received.push(notification);
        }
        received
    }

    /// Creates a granting template for `permission` on `domain_entity_id`.
    pub async fn template(&self, domain_entity_id: i64, permission: &AclPermission) -> AclEntryTemplate {
        self.service
            .create_entry_template(NewAclEntryTemplate {
                domain_entity_id,
                permission_id: permission.id,
                granting: true,
            })
            .await
            .unwrap()
    }

    pub async fn node(&self, class_name: &str, entity_id: i64) -> AclDomainEntity {
        self.service
            .update_or_create_domain_entity(class_name, entity_id, None)
            .await
            .unwrap()
    }

    pub async fn child(
        &self,
        class_name: &str,
        entity_id: i64,
        parent: &AclDomainEntity,
        parent_class: &str,
    ) -> AclDomainEntity {
        self.service
            .update_or_create_domain_entity(class_name, entity_id, Some((parent_class, parent.entity_id)))
            .await
            .unwrap()
    }
}

pub fn hierarchy() -> Arc<EntityClassHierarchy> {
    Arc::new(
        EntityClassHierarchy::new()
            .with(FOLDER, NODE)
            .with(DOCUMENT, NODE),
    )
}

pub fn config() -> AclServiceConfig {
    AclServiceConfig::default()
        .with_system_administrator(ADMIN)
        .with_root(ROOT_CLASS, ROOT_ENTITY_ID)
}

/// Bootstrapped store with accounts for alice and bob and READ/WRITE permissions.
pub fn setup() -> TestAcl {
    setup_with_config(config())
}

pub fn setup_with_config(config: AclServiceConfig) -> TestAcl {
    let store = MemoryAclStore::new();
    let root = store.bootstrap(ADMIN, ROOT_CLASS, ROOT_ENTITY_ID);
    store.add_user_account(ALICE);
    store.add_user_account(BOB);
    let read = store.add_permission("READ", 1);
    let write = store.add_permission("WRITE", 2);

    let (notifier, notifications) = ChannelNotifier::channel();
    let service = AclService::new(Arc::new(store.clone()), Arc::new(notifier), config)
        .with_hierarchy(hierarchy());

    TestAcl {
        store,
        service: Arc::new(service),
        notifications,
        root,
        read,
        write,
    }
}

// =============================================================================
// Listener fixtures
// =============================================================================

/// One observed listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Created { listener: String, domain_entity_id: i64 },
    ParentChanged {
        listener: String,
        domain_entity_id: i64,
        previous_parent_id: Option<i64>,
        new_parent_id: i64,
    },
    BeforeDelete { listener: String, domain_entity_id: i64 },
    BeforeCreateEntry { listener: String, template_id: i64, user_id: String },
    BeforeDeleteEntry { listener: String, template_id: i64, user_id: String },
    Flushed { listener: String, domain_entity_ids: Vec<i64> },
}

pub type EventLog = Arc<Mutex<Vec<ListenerEvent>>>;

/// Records every callback into a shared log and optionally vetoes or
/// replaces entry changes.
pub struct RecordingListener {
    name: String,
    log: EventLog,
    veto_create: bool,
    veto_delete: bool,
    replacement: Option<AclEntryTemplate>,
    failing_hook: Option<&'static str>,
}

impl RecordingListener {
    pub fn new(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            veto_create: false,
            veto_delete: false,
            replacement: None,
            failing_hook: None,
        }
    }

    pub fn vetoing_create(mut self) -> Self {
        self.veto_create = true;
        self
    }

    pub fn vetoing_delete(mut self) -> Self {
        self.veto_delete = true;
        self
    }

    pub fn replacing_with(mut self, template: AclEntryTemplate) -> Self {
        self.replacement = Some(template);
        self
    }

    pub fn failing_on_create(self) -> Self {
        self.failing_in("after_create_domain_entity")
    }

    /// Makes the hook named `hook` return an error after recording.
    pub fn failing_in(mut self, hook: &'static str) -> Self {
        self.failing_hook = Some(hook);
        self
    }

    fn record(&self, event: ListenerEvent) {
        self.log.lock().push(event);
    }

    fn fail_if(&self, hook: &'static str) -> ListenerResult<()> {
        if self.failing_hook == Some(hook) {
            return Err(format!("{} refused in {hook}", self.name).into());
        }
        Ok(())
    }
}

#[async_trait]
impl AclModificationListener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn after_create_domain_entity(&self, domain_entity: &AclDomainEntity) -> ListenerResult<()> {
        self.record(ListenerEvent::Created {
            listener: self.name.clone(),
            domain_entity_id: domain_entity.id,
        });
        self.fail_if("after_create_domain_entity")
    }

    async fn after_domain_entity_parent_change(
        &self,
        domain_entity_id: i64,
        previous_parent_id: Option<i64>,
        new_parent_id: i64,
    ) -> ListenerResult<()> {
        self.record(ListenerEvent::ParentChanged {
            listener: self.name.clone(),
            domain_entity_id,
            previous_parent_id,
            new_parent_id,
        });
        self.fail_if("after_domain_entity_parent_change")
    }

    async fn before_delete_domain_entity(&self, domain_entity: &AclDomainEntity) -> ListenerResult<()> {
        self.record(ListenerEvent::BeforeDelete {
            listener: self.name.clone(),
            domain_entity_id: domain_entity.id,
        });
        self.fail_if("before_delete_domain_entity")
    }

    async fn before_create_entry(
        &self,
        template: AclEntryTemplate,
        user_id: &str,
    ) -> ListenerResult<Option<AclEntryTemplate>> {
        self.record(ListenerEvent::BeforeCreateEntry {
            listener: self.name.clone(),
            template_id: template.id,
            user_id: user_id.to_string(),
        });
        self.fail_if("before_create_entry")?;
        if self.veto_create {
            return Ok(None);
        }
        Ok(Some(self.replacement.clone().unwrap_or(template)))
    }

    async fn before_delete_entry(&self, template_id: i64, user_id: &str) -> ListenerResult<bool> {
        self.record(ListenerEvent::BeforeDeleteEntry {
            listener: self.name.clone(),
            template_id,
            user_id: user_id.to_string(),
        });
        self.fail_if("before_delete_entry")?;
        Ok(!self.veto_delete)
    }

    async fn after_flush_modification_context(
        &self,
        context: &AclModificationContext,
    ) -> ListenerResult<()> {
        self.record(ListenerEvent::Flushed {
            listener: self.name.clone(),
            domain_entity_ids: context.domain_entity_ids(),
        });
        self.fail_if("after_flush_modification_context")
    }
}

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}
