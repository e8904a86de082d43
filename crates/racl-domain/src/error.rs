//! Domain error types for ACL operations.

use racl_storage::StorageError;
use thiserror::Error;

/// Error raised by a modification listener hook.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for modification listener hooks.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Domain-specific errors for ACL operations.
#[derive(Debug, Error)]
pub enum AclError {
    /// Domain entity class not found by name.
    #[error("domain entity class not found: {class}")]
    DomainEntityClassNotFound { class: String },

    /// Domain entity class not found by internal id.
    #[error("domain entity class not found: id {id}")]
    DomainEntityClassIdNotFound { id: i64 },

    /// Domain entity not found by class and external id.
    #[error("domain entity not found: {class}#{entity_id}")]
    DomainEntityNotFound { class: String, entity_id: i64 },

    /// Domain entity not found by internal id.
    #[error("domain entity not found: id {id}")]
    DomainEntityIdNotFound { id: i64 },

    /// Entry template not found.
    #[error("entry template not found: id {id}")]
    EntryTemplateNotFound { id: i64 },

    /// Permission not found.
    #[error("permission not found: {permission}")]
    PermissionNotFound { permission: String },

    /// User account could not be locked for a grant or revoke.
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: String },

    /// The principal lacks the requested permission.
    #[error("user '{user_id}' has no permission {mask} on {class}#{entity_id}")]
    NoPermission {
        class: String,
        entity_id: i64,
        mask: u32,
        user_id: String,
    },

    /// Bootstrap rows (system administrator SID, root class, root entity) are missing.
    #[error("ACL configuration error: {message}")]
    Configuration { message: String },

    /// Caller passed an argument the engine does not accept.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A modification listener failed; the triggering operation is aborted.
    #[error("modification listener '{listener}' failed in {hook}: {source}")]
    Listener {
        listener: String,
        hook: &'static str,
        #[source]
        source: ListenerError,
    },

    /// A current-user variant was called outside a user scope.
    #[error("no current user in scope")]
    NoCurrentUser,

    /// Error from the storage layer.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AclError {
    pub(crate) fn listener(listener: &str, hook: &'static str, source: ListenerError) -> Self {
        AclError::Listener {
            listener: listener.to_string(),
            hook,
            source,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        AclError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        AclError::Configuration {
            message: message.into(),
        }
    }
}

/// Result type for ACL operations.
pub type AclResult<T> = Result<T, AclError>;
