//! Permission check and permission cache tests.

mod common;

use std::sync::Arc;

use common::*;
use racl_domain::{with_current_user, AclError, HasPermissionCacheKey, PermissionMask};

// ============================================================
// Section 1: Decisions
// ============================================================

#[tokio::test]
async fn test_grant_on_ancestor_is_inherited() {
    let acl = setup();
    let folder = acl.node(FOLDER, 1).await;
    acl.child(DOCUMENT, 7, &folder, FOLDER).await;
    let template = acl.template(folder.id, &acl.read).await;
    acl.service.create_entry(&template, ALICE).await.unwrap();

    let allowed = acl
        .service
        .has_permission(DOCUMENT, 7, PermissionMask::READ, ALICE)
        .await
        .unwrap();

    assert!(allowed);
}

#[tokio::test]
async fn test_every_requested_bit_must_be_granted() {
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;
    let read = acl.template(doc.id, &acl.read).await;
    acl.service.create_entry(&read, ALICE).await.unwrap();
    let read_write = PermissionMask::READ | PermissionMask::WRITE;

    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, read_write, ALICE)
        .await
        .unwrap());

    let write = acl.template(doc.id, &acl.write).await;
    acl.service.create_entry(&write, ALICE).await.unwrap();

    assert!(acl
        .service
        .has_permission(DOCUMENT, 42, read_write, ALICE)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_empty_mask_is_invalid() {
    let acl = setup();
    acl.node(DOCUMENT, 42).await;

    let result = acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::new(0), ALICE)
        .await;

    assert!(matches!(result, Err(AclError::InvalidArgument { .. })));
}

#[tokio::test]
async fn test_unknown_domain_entity_is_not_cached() {
    let acl = setup();

    let missing = acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await;
    assert!(matches!(missing, Err(AclError::DomainEntityNotFound { .. })));

    let doc = acl.node(DOCUMENT, 42).await;

    assert_eq!(
        acl.service.domain_entity_id(DOCUMENT, 42).await.unwrap(),
        doc.id
    );
}

#[tokio::test]
async fn test_check_permission_reports_audit_fields() {
    let acl = setup();
    acl.node(DOCUMENT, 42).await;

    let result = acl
        .service
        .check_permission(DOCUMENT, 42, PermissionMask::READ, BOB)
        .await;

    match result {
        Err(AclError::NoPermission {
            class,
            entity_id,
            mask,
            user_id,
        }) => {
            assert_eq!(class, DOCUMENT);
            assert_eq!(entity_id, 42);
            assert_eq!(mask, PermissionMask::READ.bits());
            assert_eq!(user_id, BOB);
        }
        other => panic!("expected NoPermission, got {other:?}"),
    }
}

// ============================================================
// Section 2: Current user
// ============================================================

#[tokio::test]
async fn test_current_user_variants() {
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;
    let template = acl.template(doc.id, &acl.read).await;
    acl.service.create_entry(&template, ALICE).await.unwrap();
    let service = Arc::clone(&acl.service);

    let (allowed, checked) = with_current_user(ALICE, async {
        let allowed = service
            .has_permission_for_current_user(DOCUMENT, 42, PermissionMask::READ)
            .await
            .unwrap();
        let checked = service
            .check_permission_for_current_user(DOCUMENT, 42, PermissionMask::WRITE)
            .await;
        (allowed, checked)
    })
    .await;

    assert!(allowed);
    assert!(matches!(checked, Err(AclError::NoPermission { .. })));
}

#[tokio::test]
async fn test_current_user_variant_outside_scope_fails() {
    let acl = setup();
    acl.node(DOCUMENT, 42).await;

    let result = acl
        .service
        .has_permission_for_current_user(DOCUMENT, 42, PermissionMask::READ)
        .await;

    assert!(matches!(result, Err(AclError::NoCurrentUser)));
}

// ============================================================
// Section 3: Cache behaviour
// ============================================================

#[tokio::test]
async fn test_invalidation_forces_recompute_then_hits() {
    // Arrange
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;
    let template = acl.template(doc.id, &acl.read).await;
    acl.service.create_entry(&template, ALICE).await.unwrap();

    // Act + Assert: first call computes, second hits
    assert!(acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
    assert!(acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, BOB)
        .await
        .is_ok());
    assert_eq!(acl.store.permission_query_count(), 2);
    acl.service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap();
    assert_eq!(acl.store.permission_query_count(), 2);

    acl.service.invalidate_has_permission_cache();

    // Every principal recomputes once, then hits again
    acl.service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap();
    acl.service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, BOB)
        .await
        .unwrap();
    assert_eq!(acl.store.permission_query_count(), 4);
    acl.service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap();
    acl.service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, BOB)
        .await
        .unwrap();
    assert_eq!(acl.store.permission_query_count(), 4);
}

#[tokio::test]
async fn test_reparent_invalidates_cached_decisions() {
    let acl = setup();
    let granted = acl.node(FOLDER, 1).await;
    acl.node(FOLDER, 2).await;
    acl.child(DOCUMENT, 7, &granted, FOLDER).await;
    let template = acl.template(granted.id, &acl.read).await;
    acl.service.create_entry(&template, ALICE).await.unwrap();
    assert!(acl
        .service
        .has_permission(DOCUMENT, 7, PermissionMask::READ, ALICE)
        .await
        .unwrap());

    acl.service
        .update_or_create_domain_entity(DOCUMENT, 7, Some((FOLDER, 2)))
        .await
        .unwrap();

    assert!(!acl
        .service
        .has_permission(DOCUMENT, 7, PermissionMask::READ, ALICE)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_cache_accessors() {
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;

    acl.service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap();
    let cache = acl.service.has_permission_cache(ALICE);

    assert_eq!(
        acl.service.has_permission_cache_name(ALICE),
        "racl.HasPermissionCache_alice"
    );
    assert_eq!(cache.name(), "racl.HasPermissionCache_alice");
    assert_eq!(
        cache
            .get(&HasPermissionCacheKey::new(doc.id, PermissionMask::READ.bits()))
            .await,
        Some(false)
    );
}

#[tokio::test]
async fn test_without_invalidator_decisions_stay_cached() {
    let acl = setup_with_config(config().with_cache_invalidator(false));
    let doc = acl.node(DOCUMENT, 42).await;
    let template = acl.template(doc.id, &acl.read).await;
    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());

    acl.service.create_entry(&template, ALICE).await.unwrap();

    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
    acl.service.invalidate_has_permission_cache();
    assert!(acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
}

// ============================================================
// Section 4: Cache and transaction boundaries
// ============================================================

#[tokio::test]
async fn test_rolled_back_grant_is_not_served_from_cache() {
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;
    let template = acl.template(doc.id, &acl.read).await;

    let mut op = acl.service.begin().await.unwrap();
    op.create_entry(&template, ALICE).await.unwrap();
    // The in-memory store exposes the uncommitted entry to other readers.
    assert!(acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
    op.rollback().await.unwrap();

    assert!(acl.store.entries().is_empty());
    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_dropped_grant_is_not_served_from_cache() {
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;
    let template = acl.template(doc.id, &acl.read).await;

    {
        let mut op = acl.service.begin().await.unwrap();
        op.create_entry(&template, ALICE).await.unwrap();
        assert!(acl
            .service
            .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
            .await
            .unwrap());
    }

    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_commit_clears_decisions_cached_during_the_operation() {
    let acl = setup();
    let doc = acl.node(DOCUMENT, 42).await;
    let template = acl.template(doc.id, &acl.read).await;
    acl.service.create_entry(&template, ALICE).await.unwrap();

    let mut op = acl.service.begin().await.unwrap();
    op.delete_entry(template.id, ALICE).await.unwrap();
    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
    let queries = acl.store.permission_query_count();
    op.commit().await.unwrap();

    assert!(!acl
        .service
        .has_permission(DOCUMENT, 42, PermissionMask::READ, ALICE)
        .await
        .unwrap());
    assert_eq!(acl.store.permission_query_count(), queries + 1);
}

#[tokio::test]
async fn test_rolled_back_reparent_is_not_served_from_cache() {
    let acl = setup();
    let granted = acl.node(FOLDER, 1).await;
    acl.node(FOLDER, 2).await;
    acl.child(DOCUMENT, 7, &granted, FOLDER).await;
    let template = acl.template(granted.id, &acl.read).await;
    acl.service.create_entry(&template, ALICE).await.unwrap();

    let mut op = acl.service.begin().await.unwrap();
    op.update_or_create_domain_entity(DOCUMENT, 7, Some((FOLDER, 2)))
        .await
        .unwrap();
    assert!(!acl
        .service
        .has_permission(DOCUMENT, 7, PermissionMask::READ, ALICE)
        .await
        .unwrap());
    op.rollback().await.unwrap();

    assert!(acl
        .service
        .has_permission(DOCUMENT, 7, PermissionMask::READ, ALICE)
        .await
        .unwrap());
}
