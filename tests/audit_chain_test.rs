mod common;

use assert_matches::assert_matches;
use common::TestApp;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use stockflow::entities::audit_event::{self, GENESIS_HASH};
use stockflow::errors::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn appends_link_each_event_to_its_predecessor() {
    let app = TestApp::new().await;
    let company = Uuid::new_v4();
    let ctx = app.ctx(company);

    let first = app
        .state
        .audit
        .append(&ctx, "stock.received", "inventory_record", "a", None)
        .await
        .unwrap();
    let second = app
        .state
        .audit
        .append(
            &ctx,
            "transfer.requested",
            "transfer_request",
            "b",
            Some(json!({"requested_quantity": 30})),
        )
        .await
        .unwrap();
    let third = app
        .state
        .audit
        .append(&ctx, "transfer.approved", "transfer_request", "b", None)
        .await
        .unwrap();

    assert_eq!(first.sequence, 1);
    assert_eq!(second.sequence, 2);
    assert_eq!(third.sequence, 3);
    assert_eq!(first.prev_hash, GENESIS_HASH);
    assert_eq!(second.prev_hash, first.hash);
    assert_eq!(third.prev_hash, second.hash);

    let verified = app.state.audit.verify(company, 1, 3).await.unwrap();
    assert_eq!(verified, 3);

    // Sub-ranges anchor on the preceding stored hash.
    assert_eq!(app.state.audit.verify(company, 2, 3).await.unwrap(), 2);
    assert_eq!(app.state.audit.verify(company, 3, 3).await.unwrap(), 1);
}

#[tokio::test]
async fn tampering_with_details_breaks_verification_from_that_event() {
    let app = TestApp::new().await;
    let company = Uuid::new_v4();
    let ctx = app.ctx(company);

    for i in 0..3 {
        app.state
            .audit
            .append(
                &ctx,
                "transfer.requested",
                "transfer_request",
                &i.to_string(),
                Some(json!({"requested_quantity": 10 + i})),
            )
            .await
            .unwrap();
    }

    // Forge the middle event's payload behind the service's back.
    let (events, _) = app.state.audit.list_by_company(company, 1, 10).await.unwrap();
    let target = events.iter().find(|e| e.sequence == 2).unwrap().clone();
    let mut active: audit_event::ActiveModel = target.into();
    active.details_json = Set(Some(r#"{"requested_quantity":9000}"#.to_string()));
    active.update(&*app.state.db).await.unwrap();

    let err = app.state.audit.verify(company, 1, 3).await.unwrap_err();
    assert_matches!(err, ServiceError::TamperedAuditChain(_));
    assert!(err.to_string().contains("sequence 2"));
    assert!(!err.is_recoverable());

    // Everything before the forged event still verifies; the forged
    // event poisons its own range and any range starting at it.
    assert_eq!(app.state.audit.verify(company, 1, 1).await.unwrap(), 1);
    assert_matches!(
        app.state.audit.verify(company, 2, 3).await,
        Err(ServiceError::TamperedAuditChain(_))
    );
}

#[tokio::test]
async fn rewriting_a_stored_hash_breaks_the_link_to_the_successor() {
    let app = TestApp::new().await;
    let company = Uuid::new_v4();
    let ctx = app.ctx(company);

    for i in 0..3 {
        app.state
            .audit
            .append(&ctx, "permission.granted", "one_time_permission", &i.to_string(), None)
            .await
            .unwrap();
    }

    let (events, _) = app.state.audit.list_by_company(company, 1, 10).await.unwrap();
    let target = events.iter().find(|e| e.sequence == 2).unwrap().clone();
    let mut active: audit_event::ActiveModel = target.into();
    active.hash = Set("f".repeat(64));
    active.update(&*app.state.db).await.unwrap();

    // The rewritten hash fails its own recomputation...
    assert_matches!(
        app.state.audit.verify(company, 1, 3).await,
        Err(ServiceError::TamperedAuditChain(_))
    );
    // ...and no longer matches the successor's recorded prev-hash.
    assert_matches!(
        app.state.audit.verify(company, 3, 3).await,
        Err(ServiceError::TamperedAuditChain(_))
    );
}

#[tokio::test]
async fn chains_are_scoped_per_company() {
    let app = TestApp::new().await;
    let company_a = Uuid::new_v4();
    let company_b = Uuid::new_v4();

    app.state
        .audit
        .append(&app.ctx(company_a), "stock.received", "inventory_record", "x", None)
        .await
        .unwrap();
    let b_first = app
        .state
        .audit
        .append(&app.ctx(company_b), "stock.received", "inventory_record", "y", None)
        .await
        .unwrap();

    // Each chain numbers independently from its own genesis.
    assert_eq!(b_first.sequence, 1);
    assert_eq!(b_first.prev_hash, GENESIS_HASH);
    assert_eq!(app.state.audit.head_sequence(company_a).await.unwrap(), 1);
    assert_eq!(app.state.audit.verify(company_a, 1, 1).await.unwrap(), 1);
    assert_eq!(app.state.audit.verify(company_b, 1, 1).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_appends_are_totally_ordered() {
    let app = TestApp::new().await;
    let company = Uuid::new_v4();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let audit = app.state.audit.clone();
        let ctx = app.ctx(company);
        tasks.push(tokio::spawn(async move {
            audit
                .append(&ctx, "stock.adjusted", "inventory_record", &i.to_string(), None)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let (events, total) = app.state.audit.list_by_company(company, 1, 20).await.unwrap();
    assert_eq!(total, 10);
    let mut sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=10).collect::<Vec<i64>>());

    assert_eq!(app.state.audit.verify(company, 1, 10).await.unwrap(), 10);
}

#[tokio::test]
async fn verify_rejects_nonsense_ranges() {
    let app = TestApp::new().await;
    let company = Uuid::new_v4();

    assert_matches!(
        app.state.audit.verify(company, 0, 3).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state.audit.verify(company, 3, 2).await,
        Err(ServiceError::ValidationError(_))
    );
    // Anchoring on a missing predecessor is reported, not ignored.
    assert_matches!(
        app.state.audit.verify(company, 5, 6).await,
        Err(ServiceError::NotFound(_))
    );
}
