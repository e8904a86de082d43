//! Outbound change notifications.
//!
//! Two message kinds announce which domain entities changed: `modified`
//! (entries or parent changed) and `deleted`. Notifications are only sent
//! after the owning transaction committed.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure to hand a notification to the transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,

    #[error("notification transport error: {message}")]
    Transport { message: String },
}

/// Transport for domain entity change notifications.
#[async_trait]
pub trait AclNotifier: Send + Sync {
    /// Announces that the given domain entities were modified.
    async fn send_modified(&self, domain_entity_ids: Vec<i64>) -> Result<(), NotifyError>;

    /// Announces that the given domain entities were deleted.
    async fn send_deleted(&self, domain_entity_ids: Vec<i64>) -> Result<(), NotifyError>;
}

/// A notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclNotification {
    DomainEntitiesModified(Vec<i64>),
    DomainEntitiesDeleted(Vec<i64>),
}

impl AclNotification {
    pub fn domain_entity_ids(&self) -> &[i64] {
        match self {
            AclNotification::DomainEntitiesModified(ids)
            | AclNotification::DomainEntitiesDeleted(ids) => ids,
        }
    }
}

/// Notifier forwarding messages over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<AclNotification>,
}

impl ChannelNotifier {
    /// Creates a notifier together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AclNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, notification: AclNotification) -> Result<(), NotifyError> {
        self.sender
            .send(notification)
            .map_err(|_| NotifyError::ChannelClosed)
    }
}

#[async_trait]
impl AclNotifier for ChannelNotifier {
    async fn send_modified(&self, domain_entity_ids: Vec<i64>) -> Result<(), NotifyError> {
        self.send(AclNotification::DomainEntitiesModified(domain_entity_ids))
    }

    async fn send_deleted(&self, domain_entity_ids: Vec<i64>) -> Result<(), NotifyError> {
        self.send(AclNotification::DomainEntitiesDeleted(domain_entity_ids))
    }
}

/// Notifier that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl AclNotifier for NoopNotifier {
    async fn send_modified(&self, _domain_entity_ids: Vec<i64>) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn send_deleted(&self, _domain_entity_ids: Vec<i64>) -> Result<(), NotifyError> {
        Ok(())
    }
}
