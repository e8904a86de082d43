//! Task-local current user.
//!
//! The `*_for_current_user` permission checks read the principal from this
//! scope instead of taking it as an argument.

use std::future::Future;

use crate::error::{AclError, AclResult};

tokio::task_local! {
    static CURRENT_USER: String;
}

/// Runs `future` with `user_id` as the current user.
pub async fn with_current_user<F>(user_id: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_USER.scope(user_id.into(), future).await
}

/// The current user, if called inside [`with_current_user`].
pub fn current_user() -> Option<String> {
    CURRENT_USER.try_with(|user| user.clone()).ok()
}

pub(crate) fn require_current_user() -> AclResult<String> {
    current_user().ok_or(AclError::NoCurrentUser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_sets_and_restores_user() {
        assert_eq!(current_user(), None);

        let inside = with_current_user("alice", async { current_user() }).await;

        assert_eq!(inside.as_deref(), Some("alice"));
        assert_eq!(current_user(), None);
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_outer_user() {
        let users = with_current_user("alice", async {
            let inner = with_current_user("bob", async { current_user() }).await;
            (inner, current_user())
        })
        .await;

        assert_eq!(users.0.as_deref(), Some("bob"));
        assert_eq!(users.1.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_require_outside_scope_fails() {
        assert!(matches!(require_current_user(), Err(AclError::NoCurrentUser)));
    }
}
