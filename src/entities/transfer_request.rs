use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a transfer request.
///
/// The only legal edges are the ones `can_transition_to` admits; the
/// workflow service is the single place that checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Approved,
    Ready,
    InTransit,
    Delivered,
    Received,
    PartiallyReceived,
    Completed,
    Rejected,
    Cancelled,
    Damaged,
    Lost,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::Ready => "READY",
            TransferStatus::InTransit => "IN_TRANSIT",
            TransferStatus::Delivered => "DELIVERED",
            TransferStatus::Received => "RECEIVED",
            TransferStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Rejected => "REJECTED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Damaged => "DAMAGED",
            TransferStatus::Lost => "LOST",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransferStatus::Pending),
            "APPROVED" => Some(TransferStatus::Approved),
            "READY" => Some(TransferStatus::Ready),
            "IN_TRANSIT" => Some(TransferStatus::InTransit),
            "DELIVERED" => Some(TransferStatus::Delivered),
            "RECEIVED" => Some(TransferStatus::Received),
            "PARTIALLY_RECEIVED" => Some(TransferStatus::PartiallyReceived),
            "COMPLETED" => Some(TransferStatus::Completed),
            "REJECTED" => Some(TransferStatus::Rejected),
            "CANCELLED" => Some(TransferStatus::Cancelled),
            "DAMAGED" => Some(TransferStatus::Damaged),
            "LOST" => Some(TransferStatus::Lost),
            _ => None,
        }
    }

    /// Central transition table for the whole workflow.
    pub fn can_transition_to(&self, to: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (*self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Ready)
                | (Approved, InTransit)
                | (Approved, Cancelled)
                | (Ready, InTransit)
                | (Ready, Cancelled)
                | (InTransit, Delivered)
                | (InTransit, Damaged)
                | (InTransit, Lost)
                | (Delivered, Received)
                | (Delivered, PartiallyReceived)
                | (Delivered, Damaged)
                | (Delivered, Lost)
                | (Received, Completed)
                | (PartiallyReceived, Completed)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        use TransferStatus::*;
        matches!(self, Completed | Rejected | Cancelled | Damaged | Lost)
    }

    /// States from which a cancellation is still possible (goods not yet
    /// in motion).
    pub fn is_cancellable(&self) -> bool {
        use TransferStatus::*;
        matches!(self, Pending | Approved | Ready)
    }
}

/// Urgency of a transfer request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// How the consignment travels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportMethod {
    CompanyVehicle,
    Courier,
    ThirdPartyCarrier,
    HandCarry,
}

/// A tracked movement of one product between two locations.
///
/// Locations, products and users are stored as plain ids plus display
/// snapshots; resolution against the directory happens at the edges, not
/// here. Rows are never physically deleted; terminal states are retained
/// for history.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfer_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub company_id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub product_sku: Option<String>,
    pub from_location_type: String,
    pub from_location_id: Uuid,
    pub to_location_type: String,
    pub to_location_id: Uuid,
    pub requested_quantity: i32,
    pub approved_quantity: Option<i32>,
    pub received_quantity: Option<i32>,
    pub damaged_quantity: Option<i32>,
    pub status: String,
    pub priority: String,
    pub reason: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub requested_by_user_id: Uuid,
    pub requested_by_name: String,
    pub approved_by_user_id: Option<Uuid>,
    pub approved_by_name: Option<String>,
    pub received_by_user_id: Option<Uuid>,
    pub receiver_name: Option<String>,
    pub carrier_name: Option<String>,
    pub carrier_phone: Option<String>,
    pub carrier_vehicle: Option<String>,
    pub transport_method: Option<String>,
    pub proof_of_delivery_url: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub receipt_notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn status(&self) -> Option<TransferStatus> {
        TransferStatus::from_str(&self.status)
    }

    pub fn from_location(&self) -> Option<super::inventory_record::LocationRef> {
        use std::str::FromStr;
        Some(super::inventory_record::LocationRef {
            location_type: super::inventory_record::LocationType::from_str(
                &self.from_location_type,
            )
            .ok()?,
            id: self.from_location_id,
        })
    }

    pub fn to_location(&self) -> Option<super::inventory_record::LocationRef> {
        use std::str::FromStr;
        Some(super::inventory_record::LocationRef {
            location_type: super::inventory_record::LocationType::from_str(
                &self.to_location_type,
            )
            .ok()?,
            id: self.to_location_id,
        })
    }

    /// Minutes between shipment and receipt, when both happened.
    pub fn transit_time_minutes(&self) -> Option<i64> {
        match (self.shipped_at, self.received_at) {
            (Some(shipped), Some(received)) => Some((received - shipped).num_minutes()),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if insert {
            active_model.created_at = Set(now);
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }
        active_model.updated_at = Set(Some(now));
        Ok(active_model)
    }
}
