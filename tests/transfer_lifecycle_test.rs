mod common;

use assert_matches::assert_matches;
use common::TestApp;
use stockflow::entities::inventory_record::LocationRef;
use stockflow::entities::one_time_permission::PermissionType;
use stockflow::entities::transfer_request::{TransferPriority, TransferStatus};
use stockflow::errors::ServiceError;
use stockflow::services::transfers::{
    ActorRef, CreateTransferCommand, ReceiptInfo, ShipmentInfo,
};
use uuid::Uuid;

struct Fixture {
    app: TestApp,
    company_id: Uuid,
    product_id: Uuid,
    from: LocationRef,
    to: LocationRef,
    requester: ActorRef,
    approver: ActorRef,
    receiver: ActorRef,
}

impl Fixture {
    async fn new(source_stock: i32) -> Self {
        let app = TestApp::new().await;
        let from = LocationRef::warehouse(Uuid::new_v4());
        let to = LocationRef::store(Uuid::new_v4());
        let product_id = Uuid::new_v4();
        if source_stock > 0 {
            app.seed_stock(from, product_id, source_stock).await;
        }
        Self {
            app,
            company_id: Uuid::new_v4(),
            product_id,
            from,
            to,
            requester: ActorRef {
                id: Uuid::new_v4(),
                name: "clerk@example.com".to_string(),
            },
            approver: ActorRef {
                id: Uuid::new_v4(),
                name: "manager@example.com".to_string(),
            },
            receiver: ActorRef {
                id: Uuid::new_v4(),
                name: "storefront@example.com".to_string(),
            },
        }
    }

    fn create_command(&self, qty: i32) -> CreateTransferCommand {
        CreateTransferCommand {
            company_id: self.company_id,
            product_id: self.product_id,
            product_name: Some("Espresso beans 1kg".to_string()),
            product_sku: Some("SKU-ESP-1KG".to_string()),
            from: self.from,
            to: self.to,
            requested_quantity: qty,
            priority: TransferPriority::Medium,
            reason: Some("storefront restock".to_string()),
            notes: None,
            requested_by: self.requester.clone(),
        }
    }

    /// Grants the approver a fresh TRANSFER_APPROVAL permission.
    async fn approval_grant(&self) -> Uuid {
        self.app
            .state
            .permissions
            .grant(
                self.approver.id,
                Uuid::new_v4(),
                PermissionType::TransferApproval,
                None,
                None,
            )
            .await
            .unwrap()
            .id
    }

    async fn source_snapshot(&self) -> stockflow::services::inventory::StockSnapshot {
        self.app
            .state
            .inventory
            .get_quantity(self.from, self.product_id)
            .await
            .unwrap()
    }

    async fn dest_snapshot(&self) -> stockflow::services::inventory::StockSnapshot {
        self.app
            .state
            .inventory
            .get_quantity(self.to, self.product_id)
            .await
            .unwrap()
    }

    fn shipment(&self) -> ShipmentInfo {
        ShipmentInfo {
            carrier_name: "Metro Freight".to_string(),
            carrier_phone: Some("+15550100".to_string()),
            carrier_vehicle: Some("VAN-12".to_string()),
            transport_method: None,
            estimated_delivery_at: None,
        }
    }
}

#[tokio::test]
async fn full_lifecycle_commits_quantities_at_receipt() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    // Request 30 of 100: reservation holds them at the source.
    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Pending.as_str());
    let source = fx.source_snapshot().await;
    assert_eq!(source.available_quantity, 70);
    assert_eq!(source.reserved_quantity, 30);

    // Approve 25 of 30: the surplus 5 frees up immediately.
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Approved.as_str());
    assert_eq!(request.approved_quantity, Some(25));
    let source = fx.source_snapshot().await;
    assert_eq!(source.available_quantity, 75);
    assert_eq!(source.reserved_quantity, 25);

    // Ship and deliver: goods in motion, ledger untouched.
    let request = fx
        .app
        .state
        .transfers
        .ship(&ctx, request.id, fx.shipment())
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::InTransit.as_str());
    let request = fx
        .app
        .state
        .transfers
        .deliver(&ctx, request.id, Some("https://pod.example/123".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Delivered.as_str());
    assert_eq!(fx.source_snapshot().await.reserved_quantity, 25);
    assert_eq!(fx.dest_snapshot().await.current_quantity, 0);

    // Receipt is the commit point.
    let request = fx
        .app
        .state
        .transfers
        .receive(
            &ctx,
            request.id,
            ReceiptInfo {
                received_quantity: 25,
                damaged_quantity: 0,
                receiver: fx.receiver.clone(),
                receipt_notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Received.as_str());
    let source = fx.source_snapshot().await;
    assert_eq!(source.current_quantity, 75);
    assert_eq!(source.reserved_quantity, 0);
    assert_eq!(fx.dest_snapshot().await.current_quantity, 25);

    // Complete, then complete again: the second call is a no-op success.
    let request = fx.app.state.transfers.complete(&ctx, request.id).await.unwrap();
    assert_eq!(request.status, TransferStatus::Completed.as_str());
    let again = fx.app.state.transfers.complete(&ctx, request.id).await.unwrap();
    assert_eq!(again.status, TransferStatus::Completed.as_str());

    // The whole story is on the audit chain and verifies end to end.
    let head = fx
        .app
        .state
        .audit
        .head_sequence(fx.company_id)
        .await
        .unwrap();
    assert_eq!(head, 6); // requested, approved, shipped, delivered, received, completed
    let verified = fx
        .app
        .state
        .audit
        .verify(fx.company_id, 1, head)
        .await
        .unwrap();
    assert_eq!(verified, 6);
}

#[tokio::test]
async fn partial_receipt_writes_off_damaged_units() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .ship(&ctx, request.id, fx.shipment())
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .deliver(&ctx, request.id, None)
        .await
        .unwrap();

    let request = fx
        .app
        .state
        .transfers
        .receive(
            &ctx,
            request.id,
            ReceiptInfo {
                received_quantity: 20,
                damaged_quantity: 5,
                receiver: fx.receiver.clone(),
                receipt_notes: Some("two cartons crushed".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::PartiallyReceived.as_str());
    assert_eq!(request.received_quantity, Some(20));
    assert_eq!(request.damaged_quantity, Some(5));

    // Destination gains only the intact units; the damaged five exist
    // nowhere in the ledger.
    assert_eq!(fx.dest_snapshot().await.current_quantity, 20);
    let source = fx.source_snapshot().await;
    assert_eq!(source.current_quantity, 75);
    assert_eq!(source.reserved_quantity, 0);

    let request = fx.app.state.transfers.complete(&ctx, request.id).await.unwrap();
    assert_eq!(request.status, TransferStatus::Completed.as_str());
}

#[tokio::test]
async fn receive_rejects_quantities_beyond_approved() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .ship(&ctx, request.id, fx.shipment())
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .deliver(&ctx, request.id, None)
        .await
        .unwrap();

    let err = fx
        .app
        .state
        .transfers
        .receive(
            &ctx,
            request.id,
            ReceiptInfo {
                received_quantity: 20,
                damaged_quantity: 10,
                receiver: fx.receiver.clone(),
                receipt_notes: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::QuantityMismatch(_));
    assert!(err.to_string().contains("exceeds approved 25"));

    // Failed receipt moved nothing.
    assert_eq!(fx.source_snapshot().await.reserved_quantity, 25);
    assert_eq!(fx.dest_snapshot().await.current_quantity, 0);
}

#[tokio::test]
async fn illegal_edges_fail_with_invalid_state_transition() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(10))
        .await
        .unwrap();

    // receive / ship / deliver / complete are all out of reach from PENDING.
    assert_matches!(
        fx.app
            .state
            .transfers
            .receive(
                &ctx,
                request.id,
                ReceiptInfo {
                    received_quantity: 0,
                    damaged_quantity: 0,
                    receiver: fx.receiver.clone(),
                    receipt_notes: None,
                },
            )
            .await,
        Err(ServiceError::InvalidStateTransition(_))
    );
    assert_matches!(
        fx.app.state.transfers.ship(&ctx, request.id, fx.shipment()).await,
        Err(ServiceError::InvalidStateTransition(_))
    );
    assert_matches!(
        fx.app.state.transfers.deliver(&ctx, request.id, None).await,
        Err(ServiceError::InvalidStateTransition(_))
    );
    assert_matches!(
        fx.app.state.transfers.complete(&ctx, request.id).await,
        Err(ServiceError::InvalidStateTransition(_))
    );
}

#[tokio::test]
async fn oversized_request_creates_nothing() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let err = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(200))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // No request row, no reservation, no audit entry leaked.
    let (requests, total) = fx
        .app
        .state
        .transfers
        .list_by_company(fx.company_id, 1, 10)
        .await
        .unwrap();
    assert!(requests.is_empty());
    assert_eq!(total, 0);
    assert_eq!(fx.source_snapshot().await.reserved_quantity, 0);
    assert_eq!(fx.app.state.audit.head_sequence(fx.company_id).await.unwrap(), 0);
}

#[tokio::test]
async fn reject_releases_the_full_reservation() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .reject(&ctx, request.id, Some("not needed".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Rejected.as_str());

    let source = fx.source_snapshot().await;
    assert_eq!(source.reserved_quantity, 0);
    assert_eq!(source.available_quantity, 100);
}

#[tokio::test]
async fn cancel_before_shipment_releases_outstanding_reservation() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap();

    let request = fx
        .app
        .state
        .transfers
        .cancel(&ctx, request.id, Some("van broke down".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Cancelled.as_str());

    let source = fx.source_snapshot().await;
    assert_eq!(source.reserved_quantity, 0);
    assert_eq!(source.available_quantity, 100);
}

#[tokio::test]
async fn cancel_is_illegal_once_in_transit() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 30, grant, fx.approver.clone())
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .ship(&ctx, request.id, fx.shipment())
        .await
        .unwrap();

    let err = fx
        .app
        .state
        .transfers
        .cancel(&ctx, request.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStateTransition(_));
    assert!(err.to_string().contains("goods already in motion"));
}

#[tokio::test]
async fn approval_gate_enforces_grant_validity() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();

    // A consumed grant cannot approve.
    let grant = fx.approval_grant().await;
    fx.app.state.permissions.consume(grant).await.unwrap();
    let err = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionAlreadyUsed(_));

    // A grant of the wrong type cannot approve, and the failed attempt
    // must not burn it... the surrounding transaction rolls back.
    let wrong_type = fx
        .app
        .state
        .permissions
        .grant(
            fx.approver.id,
            Uuid::new_v4(),
            PermissionType::ManageSupply,
            None,
            None,
        )
        .await
        .unwrap();
    let err = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, wrong_type.id, fx.approver.clone())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    let reloaded = fx
        .app
        .state
        .permissions
        .get(wrong_type.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!reloaded.is_used);

    // A grant held by someone else cannot approve on your behalf.
    let someone_else = Uuid::new_v4();
    let foreign = fx
        .app
        .state
        .permissions
        .grant(
            someone_else,
            Uuid::new_v4(),
            PermissionType::TransferApproval,
            None,
            None,
        )
        .await
        .unwrap();
    let err = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, foreign.id, fx.approver.clone())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    // The request is still PENDING and fully reserved.
    let request = fx.app.state.transfers.get(request.id).await.unwrap();
    assert_eq!(request.status, TransferStatus::Pending.as_str());
    assert_eq!(fx.source_snapshot().await.reserved_quantity, 30);

    // A proper grant finally succeeds.
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Approved.as_str());
}

#[tokio::test]
async fn approving_more_than_requested_is_rejected() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let err = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 31, grant, fx.approver.clone())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));
}

#[tokio::test]
async fn ready_is_an_optional_stop_between_approval_and_shipment() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(10))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 10, grant, fx.approver.clone())
        .await
        .unwrap();

    let request = fx
        .app
        .state
        .transfers
        .mark_ready(&ctx, request.id, fx.requester.clone())
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Ready.as_str());

    let request = fx
        .app
        .state
        .transfers
        .ship(&ctx, request.id, fx.shipment())
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::InTransit.as_str());
}

#[tokio::test]
async fn lost_consignments_are_written_off_entirely() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(30))
        .await
        .unwrap();
    let grant = fx.approval_grant().await;
    let request = fx
        .app
        .state
        .transfers
        .approve(&ctx, request.id, 25, grant, fx.approver.clone())
        .await
        .unwrap();
    let request = fx
        .app
        .state
        .transfers
        .ship(&ctx, request.id, fx.shipment())
        .await
        .unwrap();

    let request = fx
        .app
        .state
        .transfers
        .mark_lost(&ctx, request.id, Some("truck hijacked".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, TransferStatus::Lost.as_str());

    // The approved 25 left the source; nothing arrived anywhere.
    let source = fx.source_snapshot().await;
    assert_eq!(source.current_quantity, 75);
    assert_eq!(source.reserved_quantity, 0);
    assert_eq!(fx.dest_snapshot().await.current_quantity, 0);

    // Terminal: nothing further is possible.
    assert_matches!(
        fx.app.state.transfers.deliver(&ctx, request.id, None).await,
        Err(ServiceError::InvalidStateTransition(_))
    );
}

#[tokio::test]
async fn same_location_transfers_are_rejected() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let mut cmd = fx.create_command(10);
    cmd.to = cmd.from;
    assert_matches!(
        fx.app.state.transfers.create(&ctx, cmd).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn pending_approvals_queue_is_scoped_to_the_source_location() {
    let fx = Fixture::new(100).await;
    let ctx = fx.app.ctx(fx.company_id);

    let request = fx
        .app
        .state
        .transfers
        .create(&ctx, fx.create_command(5))
        .await
        .unwrap();

    let queue = fx
        .app
        .state
        .transfers
        .pending_approvals_for_location(fx.from)
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, request.id);

    let other = fx
        .app
        .state
        .transfers
        .pending_approvals_for_location(fx.to)
        .await
        .unwrap();
    assert!(other.is_empty());
}
