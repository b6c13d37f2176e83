//! Supervised stock transfer workflow.
//!
//! Drives a transfer request through its state machine, pairing every
//! ledger mutation with exactly one audit event. All transition checks
//! go through the central `TransferStatus::can_transition_to` table, and
//! every status write is a compare-and-set against the status the caller
//! observed, so two racing transitions on the same request cannot both
//! succeed.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use sea_orm::ActiveModelTrait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::inventory_record::LocationRef;
use crate::entities::one_time_permission::PermissionType;
use crate::entities::transfer_request::{
    self, Entity as TransferRequests, TransferPriority, TransferStatus, TransportMethod,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{AuditContext, AuditService};
use crate::services::inventory;
use crate::services::permissions::PermissionService;

const ENTITY_TYPE: &str = "transfer_request";

lazy_static! {
    static ref TRANSFER_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_transitions_total",
            "Total number of successful transfer transitions"
        ),
        &["action"]
    )
    .expect("metric can be created");
    static ref TRANSFER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_transition_failures_total",
            "Total number of rejected transfer transitions"
        ),
        &["action"]
    )
    .expect("metric can be created");
}

/// Acting user reference: id plus display-name snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: Uuid,
    pub name: String,
}

/// Input for creating a transfer request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTransferCommand {
    pub company_id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub product_sku: Option<String>,
    pub from: LocationRef,
    pub to: LocationRef,
    #[validate(range(min = 1, message = "Requested quantity must be at least 1"))]
    pub requested_quantity: i32,
    pub priority: TransferPriority,
    pub reason: Option<String>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
    pub requested_by: ActorRef,
}

/// Carrier details recorded at shipment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShipmentInfo {
    #[validate(length(min = 1, max = 200, message = "Carrier name is required"))]
    pub carrier_name: String,
    pub carrier_phone: Option<String>,
    pub carrier_vehicle: Option<String>,
    pub transport_method: Option<TransportMethod>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
}

/// Receipt confirmation details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub received_quantity: i32,
    pub damaged_quantity: i32,
    pub receiver: ActorRef,
    pub receipt_notes: Option<String>,
}

/// Which side of a location the query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Inbound,
    Outbound,
    Any,
}

/// Service driving transfer requests through their lifecycle.
#[derive(Clone)]
pub struct TransferService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    audit: AuditService,
    permissions: PermissionService,
}

impl TransferService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        audit: AuditService,
        permissions: PermissionService,
    ) -> Self {
        Self {
            db,
            event_sender,
            audit,
            permissions,
        }
    }

    async fn load(&self, id: Uuid) -> Result<transfer_request::Model, ServiceError> {
        TransferRequests::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transfer request {} not found", id)))
    }

    fn status_of(request: &transfer_request::Model) -> Result<TransferStatus, ServiceError> {
        request.status().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "transfer {} has unrecognized status '{}'",
                request.id, request.status
            ))
        })
    }

    fn guard(
        action: &str,
        request: &transfer_request::Model,
        to: TransferStatus,
    ) -> Result<TransferStatus, ServiceError> {
        let current = Self::status_of(request)?;
        if !current.can_transition_to(to) {
            TRANSFER_FAILURES.with_label_values(&[action]).inc();
            return Err(ServiceError::InvalidStateTransition(format!(
                "cannot {} transfer {} in status {}",
                action,
                request.id,
                current.as_str()
            )));
        }
        Ok(current)
    }

    fn locations(
        request: &transfer_request::Model,
    ) -> Result<(LocationRef, LocationRef), ServiceError> {
        let from = request.from_location().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "transfer {} has unrecognized source location type '{}'",
                request.id, request.from_location_type
            ))
        })?;
        let to = request.to_location().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "transfer {} has unrecognized destination location type '{}'",
                request.id, request.to_location_type
            ))
        })?;
        Ok((from, to))
    }

    /// Creates a transfer request in PENDING, reserving the requested
    /// quantity at the source in the same transaction. If the source
    /// cannot cover the request nothing is created.
    #[instrument(skip(self, ctx, cmd), fields(company_id = %cmd.company_id, product_id = %cmd.product_id))]
    pub async fn create(
        &self,
        ctx: &AuditContext,
        cmd: CreateTransferCommand,
    ) -> Result<transfer_request::Model, ServiceError> {
        cmd.validate().map_err(|e| {
            TRANSFER_FAILURES.with_label_values(&["request"]).inc();
            ServiceError::ValidationError(format!("Invalid input: {}", e))
        })?;
        if cmd.from == cmd.to {
            TRANSFER_FAILURES.with_label_values(&["request"]).inc();
            return Err(ServiceError::ValidationError(
                "Source and destination locations must be different".to_string(),
            ));
        }

        let now = Utc::now();
        let insert_cmd = cmd.clone();
        let request = self
            .db
            .transaction::<_, transfer_request::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    inventory::reserve_on(
                        txn,
                        insert_cmd.from,
                        insert_cmd.product_id,
                        insert_cmd.requested_quantity,
                    )
                    .await?;

                    let model = transfer_request::ActiveModel {
                        company_id: Set(insert_cmd.company_id),
                        product_id: Set(insert_cmd.product_id),
                        product_name: Set(insert_cmd.product_name.clone()),
                        product_sku: Set(insert_cmd.product_sku.clone()),
                        from_location_type: Set(insert_cmd.from.location_type.to_string()),
                        from_location_id: Set(insert_cmd.from.id),
                        to_location_type: Set(insert_cmd.to.location_type.to_string()),
                        to_location_id: Set(insert_cmd.to.id),
                        requested_quantity: Set(insert_cmd.requested_quantity),
                        approved_quantity: Set(None),
                        received_quantity: Set(None),
                        damaged_quantity: Set(None),
                        status: Set(TransferStatus::Pending.as_str().to_string()),
                        priority: Set(insert_cmd.priority.to_string()),
                        reason: Set(insert_cmd.reason.clone()),
                        notes: Set(insert_cmd.notes.clone()),
                        requested_by_user_id: Set(insert_cmd.requested_by.id),
                        requested_by_name: Set(insert_cmd.requested_by.name.clone()),
                        requested_at: Set(now),
                        ..Default::default()
                    };
                    let saved = model.insert(txn).await?;
                    Ok(saved)
                })
            })
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.requested",
                ENTITY_TYPE,
                &request.id.to_string(),
                Some(json!({
                    "from": request.from_location_type,
                    "from_id": request.from_location_id,
                    "to": request.to_location_type,
                    "to_id": request.to_location_id,
                    "product_id": request.product_id,
                    "requested_quantity": request.requested_quantity,
                    "status": request.status,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferRequested(request.id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["request"]).inc();
        info!(transfer_id = %request.id, qty = request.requested_quantity, "Transfer requested");
        Ok(request)
    }

    /// Approves a PENDING request, consuming a TRANSFER_APPROVAL grant
    /// in the same transaction. Approving less than requested releases
    /// the surplus reservation immediately.
    #[instrument(skip(self, ctx))]
    pub async fn approve(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        approved_quantity: i32,
        permission_id: Uuid,
        approver: ActorRef,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::guard("approve", &request, TransferStatus::Approved)?;
        if approved_quantity < 0 || approved_quantity > request.requested_quantity {
            TRANSFER_FAILURES.with_label_values(&["approve"]).inc();
            return Err(ServiceError::InvalidQuantity(format!(
                "approved quantity {} must be between 0 and requested {}",
                approved_quantity, request.requested_quantity
            )));
        }
        let (from, _) = Self::locations(&request)?;

        let now = Utc::now();
        let surplus = request.requested_quantity - approved_quantity;
        let product_id = request.product_id;
        let permissions = self.permissions.clone();
        let approver_clone = approver.clone();
        let updated = self
            .db
            .transaction::<_, transfer_request::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let permission = permissions.consume_on(txn, permission_id).await?;
                    if permission.permission_type() != Some(PermissionType::TransferApproval) {
                        return Err(ServiceError::ValidationError(format!(
                            "permission {} is not a {} grant",
                            permission_id,
                            PermissionType::TransferApproval
                        )));
                    }
                    if permission.granted_to_user_id != approver_clone.id {
                        return Err(ServiceError::ValidationError(format!(
                            "permission {} was not granted to user {}",
                            permission_id, approver_clone.id
                        )));
                    }

                    if surplus > 0 {
                        inventory::release_on(txn, from, product_id, surplus).await?;
                    }

                    let result = TransferRequests::update_many()
                        .col_expr(
                            transfer_request::Column::Status,
                            Expr::value(TransferStatus::Approved.as_str()),
                        )
                        .col_expr(
                            transfer_request::Column::ApprovedQuantity,
                            Expr::value(Some(approved_quantity)),
                        )
                        .col_expr(
                            transfer_request::Column::ApprovedByUserId,
                            Expr::value(Some(approver_clone.id)),
                        )
                        .col_expr(
                            transfer_request::Column::ApprovedByName,
                            Expr::value(Some(approver_clone.name.clone())),
                        )
                        .col_expr(
                            transfer_request::Column::ApprovedAt,
                            Expr::value(Some(now)),
                        )
                        .col_expr(
                            transfer_request::Column::UpdatedAt,
                            Expr::value(Some(now)),
                        )
                        .filter(transfer_request::Column::Id.eq(id))
                        .filter(transfer_request::Column::Status.eq(current.as_str()))
                        .exec(txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Err(ServiceError::InvalidStateTransition(format!(
                            "transfer {} was modified concurrently",
                            id
                        )));
                    }

                    let updated = TransferRequests::find_by_id(id).one(txn).await?.ok_or_else(
                        || ServiceError::NotFound(format!("transfer request {} not found", id)),
                    )?;
                    Ok(updated)
                })
            })
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.approved",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "approved_quantity": approved_quantity,
                    "released_surplus": surplus,
                    "approved_by": approver.name,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferApproved {
                transfer_id: id,
                approved_quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["approve"]).inc();
        info!(transfer_id = %id, approved_quantity, "Transfer approved");
        Ok(updated)
    }

    /// Rejects a PENDING request and releases its full reservation.
    #[instrument(skip(self, ctx))]
    pub async fn reject(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::guard("reject", &request, TransferStatus::Rejected)?;
        let (from, _) = Self::locations(&request)?;

        let now = Utc::now();
        let product_id = request.product_id;
        let requested = request.requested_quantity;
        let reason_col = reason.clone();
        let updated = self
            .db
            .transaction::<_, transfer_request::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    inventory::release_on(txn, from, product_id, requested).await?;

                    let result = TransferRequests::update_many()
                        .col_expr(
                            transfer_request::Column::Status,
                            Expr::value(TransferStatus::Rejected.as_str()),
                        )
                        .col_expr(transfer_request::Column::Reason, Expr::value(reason_col))
                        .col_expr(
                            transfer_request::Column::UpdatedAt,
                            Expr::value(Some(now)),
                        )
                        .filter(transfer_request::Column::Id.eq(id))
                        .filter(transfer_request::Column::Status.eq(current.as_str()))
                        .exec(txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Err(ServiceError::InvalidStateTransition(format!(
                            "transfer {} was modified concurrently",
                            id
                        )));
                    }

                    let updated = TransferRequests::find_by_id(id).one(txn).await?.ok_or_else(
                        || ServiceError::NotFound(format!("transfer request {} not found", id)),
                    )?;
                    Ok(updated)
                })
            })
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.rejected",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "released_quantity": requested,
                    "reason": reason,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferRejected(id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["reject"]).inc();
        Ok(updated)
    }

    /// Marks an APPROVED request as packed and ready for pickup. No
    /// ledger mutation: the goods stay reserved.
    #[instrument(skip(self, ctx))]
    pub async fn mark_ready(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        packed_by: ActorRef,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::guard("mark ready", &request, TransferStatus::Ready)?;

        let updated = self
            .cas_simple(id, current, TransferStatus::Ready, &[])
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.ready",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "packed_by": packed_by.name,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferReady(id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["mark_ready"]).inc();
        Ok(updated)
    }

    /// Ships an APPROVED or READY request. No ledger mutation: the goods
    /// stay reserved until receipt confirms the move.
    #[instrument(skip(self, ctx, shipment))]
    pub async fn ship(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        shipment: ShipmentInfo,
    ) -> Result<transfer_request::Model, ServiceError> {
        shipment.validate().map_err(|e| {
            TRANSFER_FAILURES.with_label_values(&["ship"]).inc();
            ServiceError::ValidationError(format!("Invalid input: {}", e))
        })?;
        let request = self.load(id).await?;
        let current = Self::guard("ship", &request, TransferStatus::InTransit)?;

        let now = Utc::now();
        let updated = self
            .cas_simple(
                id,
                current,
                TransferStatus::InTransit,
                &[
                    (
                        transfer_request::Column::CarrierName,
                        Expr::value(Some(shipment.carrier_name.clone())),
                    ),
                    (
                        transfer_request::Column::CarrierPhone,
                        Expr::value(shipment.carrier_phone.clone()),
                    ),
                    (
                        transfer_request::Column::CarrierVehicle,
                        Expr::value(shipment.carrier_vehicle.clone()),
                    ),
                    (
                        transfer_request::Column::TransportMethod,
                        Expr::value(shipment.transport_method.map(|m| m.to_string())),
                    ),
                    (
                        transfer_request::Column::EstimatedDeliveryAt,
                        Expr::value(shipment.estimated_delivery_at),
                    ),
                    (transfer_request::Column::ShippedAt, Expr::value(Some(now))),
                ],
            )
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.shipped",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "carrier": shipment.carrier_name,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferShipped(id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["ship"]).inc();
        Ok(updated)
    }

    /// Records delivery at the destination. Receipt confirmation remains
    /// the ledger commit point.
    #[instrument(skip(self, ctx))]
    pub async fn deliver(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        proof_of_delivery_url: Option<String>,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::guard("deliver", &request, TransferStatus::Delivered)?;

        let now = Utc::now();
        let updated = self
            .cas_simple(
                id,
                current,
                TransferStatus::Delivered,
                &[
                    (
                        transfer_request::Column::ProofOfDeliveryUrl,
                        Expr::value(proof_of_delivery_url.clone()),
                    ),
                    (
                        transfer_request::Column::DeliveredAt,
                        Expr::value(Some(now)),
                    ),
                ],
            )
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.delivered",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "proof_of_delivery_url": proof_of_delivery_url,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferDelivered(id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["deliver"]).inc();
        Ok(updated)
    }

    /// Confirms receipt of a DELIVERED transfer and commits the ledger:
    /// the source reservation is consumed, the destination gains the
    /// received quantity, and damaged units are written off.
    #[instrument(skip(self, ctx, receipt))]
    pub async fn receive(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        receipt: ReceiptInfo,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        // State first: only DELIVERED transfers can be received at all.
        Self::guard("receive", &request, TransferStatus::Received)?;
        let approved = request.approved_quantity.ok_or_else(|| {
            ServiceError::ValidationError(format!("transfer {} has no approved quantity", id))
        })?;
        if receipt.received_quantity < 0 || receipt.damaged_quantity < 0 {
            TRANSFER_FAILURES.with_label_values(&["receive"]).inc();
            return Err(ServiceError::InvalidQuantity(
                "received and damaged quantities must be non-negative".to_string(),
            ));
        }
        if receipt.received_quantity + receipt.damaged_quantity > approved {
            TRANSFER_FAILURES.with_label_values(&["receive"]).inc();
            return Err(ServiceError::QuantityMismatch(format!(
                "received {} + damaged {} exceeds approved {}",
                receipt.received_quantity, receipt.damaged_quantity, approved
            )));
        }

        let target = if receipt.received_quantity == approved {
            TransferStatus::Received
        } else {
            TransferStatus::PartiallyReceived
        };
        let current = Self::guard("receive", &request, target)?;
        let (from, to) = Self::locations(&request)?;

        let now = Utc::now();
        let product_id = request.product_id;
        let receipt_clone = receipt.clone();
        let updated = self
            .db
            .transaction::<_, transfer_request::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if approved > 0 {
                        inventory::commit_reserved_on(txn, from, product_id, approved).await?;
                    }
                    if receipt_clone.received_quantity > 0 {
                        inventory::add_stock_on(
                            txn,
                            to,
                            product_id,
                            receipt_clone.received_quantity,
                        )
                        .await?;
                    }

                    let result = TransferRequests::update_many()
                        .col_expr(
                            transfer_request::Column::Status,
                            Expr::value(target.as_str()),
                        )
                        .col_expr(
                            transfer_request::Column::ReceivedQuantity,
                            Expr::value(Some(receipt_clone.received_quantity)),
                        )
                        .col_expr(
                            transfer_request::Column::DamagedQuantity,
                            Expr::value(Some(receipt_clone.damaged_quantity)),
                        )
                        .col_expr(
                            transfer_request::Column::ReceivedByUserId,
                            Expr::value(Some(receipt_clone.receiver.id)),
                        )
                        .col_expr(
                            transfer_request::Column::ReceiverName,
                            Expr::value(Some(receipt_clone.receiver.name.clone())),
                        )
                        .col_expr(
                            transfer_request::Column::ReceiptNotes,
                            Expr::value(receipt_clone.receipt_notes.clone()),
                        )
                        .col_expr(
                            transfer_request::Column::ReceivedAt,
                            Expr::value(Some(now)),
                        )
                        .col_expr(
                            transfer_request::Column::UpdatedAt,
                            Expr::value(Some(now)),
                        )
                        .filter(transfer_request::Column::Id.eq(id))
                        .filter(transfer_request::Column::Status.eq(current.as_str()))
                        .exec(txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Err(ServiceError::InvalidStateTransition(format!(
                            "transfer {} was modified concurrently",
                            id
                        )));
                    }

                    let updated = TransferRequests::find_by_id(id).one(txn).await?.ok_or_else(
                        || ServiceError::NotFound(format!("transfer request {} not found", id)),
                    )?;
                    Ok(updated)
                })
            })
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.received",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "approved_quantity": approved,
                    "received_quantity": receipt.received_quantity,
                    "damaged_quantity": receipt.damaged_quantity,
                    "received_by": receipt.receiver.name,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferReceived {
                transfer_id: id,
                received_quantity: receipt.received_quantity,
                damaged_quantity: receipt.damaged_quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["receive"]).inc();
        info!(
            transfer_id = %id,
            received = receipt.received_quantity,
            damaged = receipt.damaged_quantity,
            "Transfer received"
        );
        Ok(updated)
    }

    /// Cancels a transfer that has not shipped yet, releasing whatever
    /// reservation is still outstanding. Once goods are in motion the
    /// deliver/receive path (or a damage/loss write-off) must be used.
    #[instrument(skip(self, ctx))]
    pub async fn cancel(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::status_of(&request)?;
        if !current.is_cancellable() {
            TRANSFER_FAILURES.with_label_values(&["cancel"]).inc();
            return Err(ServiceError::InvalidStateTransition(format!(
                "cannot cancel transfer {} in status {}; goods already in motion",
                id,
                current.as_str()
            )));
        }
        let (from, _) = Self::locations(&request)?;

        // PENDING holds the full request; later states hold the approved
        // amount (which may be zero).
        let outstanding = match current {
            TransferStatus::Pending => request.requested_quantity,
            _ => request.approved_quantity.unwrap_or(0),
        };

        let now = Utc::now();
        let product_id = request.product_id;
        let reason_col = reason.clone();
        let updated = self
            .db
            .transaction::<_, transfer_request::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if outstanding > 0 {
                        inventory::release_on(txn, from, product_id, outstanding).await?;
                    }

                    let result = TransferRequests::update_many()
                        .col_expr(
                            transfer_request::Column::Status,
                            Expr::value(TransferStatus::Cancelled.as_str()),
                        )
                        .col_expr(transfer_request::Column::Reason, Expr::value(reason_col))
                        .col_expr(
                            transfer_request::Column::CancelledAt,
                            Expr::value(Some(now)),
                        )
                        .col_expr(
                            transfer_request::Column::UpdatedAt,
                            Expr::value(Some(now)),
                        )
                        .filter(transfer_request::Column::Id.eq(id))
                        .filter(transfer_request::Column::Status.eq(current.as_str()))
                        .exec(txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Err(ServiceError::InvalidStateTransition(format!(
                            "transfer {} was modified concurrently",
                            id
                        )));
                    }

                    let updated = TransferRequests::find_by_id(id).one(txn).await?.ok_or_else(
                        || ServiceError::NotFound(format!("transfer request {} not found", id)),
                    )?;
                    Ok(updated)
                })
            })
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.cancelled",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "released_quantity": outstanding,
                    "reason": reason,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferCancelled(id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["cancel"]).inc();
        Ok(updated)
    }

    /// Finalizes a received transfer. Idempotent: completing an
    /// already-COMPLETED transfer is a no-op success.
    #[instrument(skip(self, ctx))]
    pub async fn complete(
        &self,
        ctx: &AuditContext,
        id: Uuid,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::status_of(&request)?;
        if current == TransferStatus::Completed {
            return Ok(request);
        }
        let current = Self::guard("complete", &request, TransferStatus::Completed)?;

        let now = Utc::now();
        let updated = self
            .cas_simple(
                id,
                current,
                TransferStatus::Completed,
                &[(
                    transfer_request::Column::CompletedAt,
                    Expr::value(Some(now)),
                )],
            )
            .await?;

        self.audit
            .append(
                ctx,
                "transfer.completed",
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "received_quantity": updated.received_quantity,
                    "damaged_quantity": updated.damaged_quantity,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferCompleted(id))
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS.with_label_values(&["complete"]).inc();
        Ok(updated)
    }

    /// Writes off an in-motion consignment as damaged.
    #[instrument(skip(self, ctx))]
    pub async fn mark_damaged(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<transfer_request::Model, ServiceError> {
        self.write_off(ctx, id, TransferStatus::Damaged, "transfer.damaged", reason)
            .await
    }

    /// Writes off an in-motion consignment as lost.
    #[instrument(skip(self, ctx))]
    pub async fn mark_lost(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<transfer_request::Model, ServiceError> {
        self.write_off(ctx, id, TransferStatus::Lost, "transfer.lost", reason)
            .await
    }

    /// Shared damage/loss path: the whole approved consignment leaves the
    /// source ledger and nothing arrives at the destination.
    async fn write_off(
        &self,
        ctx: &AuditContext,
        id: Uuid,
        outcome: TransferStatus,
        action: &str,
        reason: Option<String>,
    ) -> Result<transfer_request::Model, ServiceError> {
        let request = self.load(id).await?;
        let current = Self::guard(action, &request, outcome)?;
        let approved = request.approved_quantity.ok_or_else(|| {
            ServiceError::ValidationError(format!("transfer {} has no approved quantity", id))
        })?;
        let (from, _) = Self::locations(&request)?;

        let now = Utc::now();
        let product_id = request.product_id;
        let reason_col = reason.clone();
        let updated = self
            .db
            .transaction::<_, transfer_request::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if approved > 0 {
                        inventory::commit_reserved_on(txn, from, product_id, approved).await?;
                    }

                    let result = TransferRequests::update_many()
                        .col_expr(
                            transfer_request::Column::Status,
                            Expr::value(outcome.as_str()),
                        )
                        .col_expr(transfer_request::Column::Reason, Expr::value(reason_col))
                        .col_expr(
                            transfer_request::Column::UpdatedAt,
                            Expr::value(Some(now)),
                        )
                        .filter(transfer_request::Column::Id.eq(id))
                        .filter(transfer_request::Column::Status.eq(current.as_str()))
                        .exec(txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Err(ServiceError::InvalidStateTransition(format!(
                            "transfer {} was modified concurrently",
                            id
                        )));
                    }

                    let updated = TransferRequests::find_by_id(id).one(txn).await?.ok_or_else(
                        || ServiceError::NotFound(format!("transfer request {} not found", id)),
                    )?;
                    Ok(updated)
                })
            })
            .await?;

        self.audit
            .append(
                ctx,
                action,
                ENTITY_TYPE,
                &id.to_string(),
                Some(json!({
                    "from_status": current.as_str(),
                    "to_status": updated.status,
                    "written_off_quantity": approved,
                    "reason": reason,
                })),
            )
            .await?;
        self.event_sender
            .send(Event::TransferWrittenOff {
                transfer_id: id,
                outcome: outcome.as_str().to_string(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        TRANSFER_TRANSITIONS
            .with_label_values(&[if outcome == TransferStatus::Damaged {
                "mark_damaged"
            } else {
                "mark_lost"
            }])
            .inc();
        Ok(updated)
    }

    /// Compare-and-set status update for transitions without ledger
    /// mutations: the WHERE clause pins the status the caller observed.
    async fn cas_simple(
        &self,
        id: Uuid,
        observed: TransferStatus,
        to: TransferStatus,
        extra: &[(transfer_request::Column, sea_orm::sea_query::SimpleExpr)],
    ) -> Result<transfer_request::Model, ServiceError> {
        let now = Utc::now();
        let mut update = TransferRequests::update_many()
            .col_expr(transfer_request::Column::Status, Expr::value(to.as_str()))
            .col_expr(
                transfer_request::Column::UpdatedAt,
                Expr::value(Some(now)),
            );
        for (column, expr) in extra {
            update = update.col_expr(*column, expr.clone());
        }
        let result = update
            .filter(transfer_request::Column::Id.eq(id))
            .filter(transfer_request::Column::Status.eq(observed.as_str()))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStateTransition(format!(
                "transfer {} was modified concurrently",
                id
            )));
        }
        self.load(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<transfer_request::Model, ServiceError> {
        self.load(id).await
    }

    /// Lists a company's transfers, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_company(
        &self,
        company_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<transfer_request::Model>, u64), ServiceError> {
        self.paginate(
            TransferRequests::find()
                .filter(transfer_request::Column::CompanyId.eq(company_id))
                .order_by_desc(transfer_request::Column::RequestedAt),
            page,
            limit,
        )
        .await
    }

    /// Lists a company's transfers in one status, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_status(
        &self,
        company_id: Uuid,
        status: TransferStatus,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<transfer_request::Model>, u64), ServiceError> {
        self.paginate(
            TransferRequests::find()
                .filter(transfer_request::Column::CompanyId.eq(company_id))
                .filter(transfer_request::Column::Status.eq(status.as_str()))
                .order_by_desc(transfer_request::Column::RequestedAt),
            page,
            limit,
        )
        .await
    }

    /// Lists transfers touching a location.
    #[instrument(skip(self))]
    pub async fn list_by_location(
        &self,
        location: LocationRef,
        direction: TransferDirection,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<transfer_request::Model>, u64), ServiceError> {
        let location_type = location.location_type.to_string();
        let query = match direction {
            TransferDirection::Outbound => TransferRequests::find()
                .filter(transfer_request::Column::FromLocationType.eq(location_type))
                .filter(transfer_request::Column::FromLocationId.eq(location.id)),
            TransferDirection::Inbound => TransferRequests::find()
                .filter(transfer_request::Column::ToLocationType.eq(location_type))
                .filter(transfer_request::Column::ToLocationId.eq(location.id)),
            TransferDirection::Any => TransferRequests::find().filter(
                sea_orm::Condition::any()
                    .add(
                        sea_orm::Condition::all()
                            .add(
                                transfer_request::Column::FromLocationType
                                    .eq(location_type.clone()),
                            )
                            .add(transfer_request::Column::FromLocationId.eq(location.id)),
                    )
                    .add(
                        sea_orm::Condition::all()
                            .add(transfer_request::Column::ToLocationType.eq(location_type))
                            .add(transfer_request::Column::ToLocationId.eq(location.id)),
                    ),
            ),
        };
        self.paginate(
            query.order_by_desc(transfer_request::Column::RequestedAt),
            page,
            limit,
        )
        .await
    }

    /// PENDING transfers sourced at a location, oldest first: the
    /// approval queue for that location's managers.
    #[instrument(skip(self))]
    pub async fn pending_approvals_for_location(
        &self,
        location: LocationRef,
    ) -> Result<Vec<transfer_request::Model>, ServiceError> {
        let requests = TransferRequests::find()
            .filter(
                transfer_request::Column::FromLocationType
                    .eq(location.location_type.to_string()),
            )
            .filter(transfer_request::Column::FromLocationId.eq(location.id))
            .filter(transfer_request::Column::Status.eq(TransferStatus::Pending.as_str()))
            .order_by_asc(transfer_request::Column::RequestedAt)
            .all(&*self.db)
            .await?;
        Ok(requests)
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<TransferRequests>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<transfer_request::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }
        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page - 1).await?;
        Ok((models, total))
    }
}

/// Action names a caller may invoke on a transfer, given its status and
/// the caller's standing. Pure function: one place for clients to ask
/// instead of re-deriving status booleans.
pub fn available_actions(
    status: TransferStatus,
    is_manager: bool,
    is_requester: bool,
    has_from_access: bool,
    has_to_access: bool,
) -> Vec<&'static str> {
    let mut actions = Vec::new();
    match status {
        TransferStatus::Pending => {
            if is_manager && has_from_access {
                actions.push("approve");
                actions.push("reject");
            }
            if is_requester || is_manager {
                actions.push("cancel");
            }
        }
        TransferStatus::Approved => {
            if has_from_access {
                actions.push("mark_ready");
                actions.push("ship");
            }
            if is_manager || is_requester {
                actions.push("cancel");
            }
        }
        TransferStatus::Ready => {
            if has_from_access {
                actions.push("ship");
            }
            if is_manager {
                actions.push("cancel");
            }
        }
        TransferStatus::InTransit => {
            if has_to_access || is_manager {
                actions.push("deliver");
            }
            if is_manager {
                actions.push("mark_damaged");
                actions.push("mark_lost");
            }
        }
        TransferStatus::Delivered => {
            if has_to_access {
                actions.push("receive");
            }
            if is_manager {
                actions.push("mark_damaged");
                actions.push("mark_lost");
            }
        }
        TransferStatus::Received | TransferStatus::PartiallyReceived => {
            if is_manager || has_to_access {
                actions.push("complete");
            }
        }
        _ => {}
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_actions_require_manager_at_source() {
        let actions = available_actions(TransferStatus::Pending, true, false, true, false);
        assert!(actions.contains(&"approve"));
        assert!(actions.contains(&"reject"));
        assert!(actions.contains(&"cancel"));

        let none = available_actions(TransferStatus::Pending, false, false, false, true);
        assert!(none.is_empty());
    }

    #[test]
    fn requester_can_cancel_but_not_approve() {
        let actions = available_actions(TransferStatus::Pending, false, true, true, false);
        assert_eq!(actions, vec!["cancel"]);
    }

    #[test]
    fn terminal_states_offer_nothing() {
        for status in [
            TransferStatus::Completed,
            TransferStatus::Rejected,
            TransferStatus::Cancelled,
            TransferStatus::Damaged,
            TransferStatus::Lost,
        ] {
            assert!(available_actions(status, true, true, true, true).is_empty());
        }
    }

    #[test]
    fn receive_belongs_to_the_destination() {
        let actions = available_actions(TransferStatus::Delivered, false, false, false, true);
        assert_eq!(actions, vec!["receive"]);
    }
}
