mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::TestApp;
use stockflow::entities::one_time_permission::PermissionType;
use stockflow::errors::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn grant_then_consume_exactly_once() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let manager = Uuid::new_v4();

    let grant = app
        .state
        .permissions
        .grant(user, manager, PermissionType::TransferApproval, None, None)
        .await
        .unwrap();
    assert!(!grant.is_used);
    assert!(grant.expires_at > grant.granted_at);

    let consumed = app.state.permissions.consume(grant.id).await.unwrap();
    assert!(consumed.is_used);
    assert!(consumed.used_at.is_some());

    let err = app.state.permissions.consume(grant.id).await.unwrap_err();
    assert_matches!(err, ServiceError::PermissionAlreadyUsed(_));
}

#[tokio::test]
async fn expired_grants_cannot_be_consumed() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let manager = Uuid::new_v4();

    let grant = app
        .state
        .permissions
        .grant(
            user,
            manager,
            PermissionType::ManageSupply,
            Some(Duration::milliseconds(20)),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    let err = app.state.permissions.consume(grant.id).await.unwrap_err();
    assert_matches!(err, ServiceError::PermissionExpired(_));
}

#[tokio::test]
async fn concurrent_consumption_has_exactly_one_winner() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let manager = Uuid::new_v4();

    let grant = app
        .state
        .permissions
        .grant(user, manager, PermissionType::TransferApproval, None, None)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let permissions = app.state.permissions.clone();
        let id = grant.id;
        tasks.push(tokio::spawn(async move { permissions.consume(id).await }));
    }

    let mut winners = 0;
    let mut already_used = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(ServiceError::PermissionAlreadyUsed(_)) => already_used += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(winners, 1, "compare-and-set admits exactly one consumer");
    assert_eq!(already_used, 7);
}

#[tokio::test]
async fn sweep_marks_only_stale_unused_grants() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let manager = Uuid::new_v4();

    let stale = app
        .state
        .permissions
        .grant(
            user,
            manager,
            PermissionType::AddItem,
            Some(Duration::milliseconds(10)),
            None,
        )
        .await
        .unwrap();
    let fresh = app
        .state
        .permissions
        .grant(user, manager, PermissionType::EditItem, None, None)
        .await
        .unwrap();
    let used = app
        .state
        .permissions
        .grant(user, manager, PermissionType::DeleteItem, None, None)
        .await
        .unwrap();
    app.state.permissions.consume(used.id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    let swept = app.state.permissions.sweep_expired().await.unwrap();
    assert_eq!(swept, 1);

    let stale = app.state.permissions.get(stale.id).await.unwrap().unwrap();
    assert!(stale.is_expired);
    let fresh = app.state.permissions.get(fresh.id).await.unwrap().unwrap();
    assert!(!fresh.is_expired);
    let used = app.state.permissions.get(used.id).await.unwrap().unwrap();
    assert!(!used.is_expired);

    // The sweep is idempotent.
    let swept_again = app.state.permissions.sweep_expired().await.unwrap();
    assert_eq!(swept_again, 0);

    let err = app.state.permissions.consume(stale.id).await.unwrap_err();
    assert_matches!(err, ServiceError::PermissionExpired(_));
}

#[tokio::test]
async fn consume_for_user_takes_the_oldest_active_grant() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let manager = Uuid::new_v4();

    let first = app
        .state
        .permissions
        .grant(user, manager, PermissionType::TransferApproval, None, None)
        .await
        .unwrap();
    let second = app
        .state
        .permissions
        .grant(user, manager, PermissionType::TransferApproval, None, None)
        .await
        .unwrap();

    let consumed = app
        .state
        .permissions
        .consume_for_user(user, PermissionType::TransferApproval)
        .await
        .unwrap();
    assert_eq!(consumed.id, first.id);

    assert!(app
        .state
        .permissions
        .has_active_permission(user, PermissionType::TransferApproval)
        .await
        .unwrap());

    let consumed = app
        .state
        .permissions
        .consume_for_user(user, PermissionType::TransferApproval)
        .await
        .unwrap();
    assert_eq!(consumed.id, second.id);

    assert!(!app
        .state
        .permissions
        .has_active_permission(user, PermissionType::TransferApproval)
        .await
        .unwrap());

    let err = app
        .state
        .permissions
        .consume_for_user(user, PermissionType::TransferApproval)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn unknown_permission_ids_are_not_found() {
    let app = TestApp::new().await;
    let err = app
        .state
        .permissions
        .consume(Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
