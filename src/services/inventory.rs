//! Inventory ledger service.
//!
//! The single source of truth for how much stock exists and how much of
//! it is spoken for at each (location, product) key. Every mutation is a
//! single conditional UPDATE whose WHERE clause re-checks the quantity
//! invariant on the locked row, so concurrent callers on the same key
//! serialize at the database and the available quantity can never go
//! negative. The ledger writes no audit events; callers pair mutations
//! with audit entries so the trail narrates business intent.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::inventory_record::{self, Entity as InventoryRecords, LocationRef};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

lazy_static! {
    static ref LEDGER_OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "inventory_ledger_operations_total",
            "Total number of ledger mutations"
        ),
        &["operation"]
    )
    .expect("metric can be created");
    static ref LEDGER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "inventory_ledger_failures_total",
            "Total number of rejected ledger mutations"
        ),
        &["operation"]
    )
    .expect("metric can be created");
}

/// Point-in-time quantity view for one ledger key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub location_type: String,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub current_quantity: i32,
    pub reserved_quantity: i32,
    pub available_quantity: i32,
    pub as_of: DateTime<Utc>,
}

impl From<inventory_record::Model> for StockSnapshot {
    fn from(model: inventory_record::Model) -> Self {
        Self {
            location_type: model.location_type.clone(),
            location_id: model.location_id,
            product_id: model.product_id,
            current_quantity: model.current_quantity,
            reserved_quantity: model.reserved_quantity,
            available_quantity: model.available_quantity(),
            as_of: model.last_updated,
        }
    }
}

fn positive(qty: i32) -> Result<(), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::InvalidQuantity(format!(
            "quantity must be positive, got {}",
            qty
        )));
    }
    Ok(())
}

pub(crate) async fn find_record<C: ConnectionTrait>(
    conn: &C,
    location: LocationRef,
    product_id: Uuid,
) -> Result<Option<inventory_record::Model>, ServiceError> {
    let record = InventoryRecords::find()
        .filter(inventory_record::Column::LocationType.eq(location.location_type.to_string()))
        .filter(inventory_record::Column::LocationId.eq(location.id))
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .one(conn)
        .await?;
    Ok(record)
}

/// Increments the reservation on a key, guarded by
/// `current - reserved >= qty` in the UPDATE itself.
pub(crate) async fn reserve_on<C: ConnectionTrait>(
    conn: &C,
    location: LocationRef,
    product_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    positive(qty)?;

    let result = InventoryRecords::update_many()
        .col_expr(
            inventory_record::Column::ReservedQuantity,
            Expr::col(inventory_record::Column::ReservedQuantity).add(qty),
        )
        .col_expr(
            inventory_record::Column::LastUpdated,
            Expr::value(Utc::now()),
        )
        .filter(inventory_record::Column::LocationType.eq(location.location_type.to_string()))
        .filter(inventory_record::Column::LocationId.eq(location.id))
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(
            Expr::expr(
                Expr::col(inventory_record::Column::CurrentQuantity)
                    .sub(Expr::col(inventory_record::Column::ReservedQuantity)),
            )
            .gte(qty),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        LEDGER_FAILURES.with_label_values(&["reserve"]).inc();
        let available = find_record(conn, location, product_id)
            .await?
            .map(|r| r.available_quantity())
            .unwrap_or(0);
        return Err(ServiceError::InsufficientStock(format!(
            "cannot reserve {} units of product {} at {}, only {} available",
            qty, product_id, location, available
        )));
    }

    LEDGER_OPERATIONS.with_label_values(&["reserve"]).inc();
    Ok(())
}

/// Decrements the reservation on a key. Over-release is rejected, not
/// clamped.
pub(crate) async fn release_on<C: ConnectionTrait>(
    conn: &C,
    location: LocationRef,
    product_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    positive(qty)?;

    let result = InventoryRecords::update_many()
        .col_expr(
            inventory_record::Column::ReservedQuantity,
            Expr::col(inventory_record::Column::ReservedQuantity).sub(qty),
        )
        .col_expr(
            inventory_record::Column::LastUpdated,
            Expr::value(Utc::now()),
        )
        .filter(inventory_record::Column::LocationType.eq(location.location_type.to_string()))
        .filter(inventory_record::Column::LocationId.eq(location.id))
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(inventory_record::Column::ReservedQuantity.gte(qty))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        LEDGER_FAILURES.with_label_values(&["release"]).inc();
        let reserved = find_record(conn, location, product_id)
            .await?
            .map(|r| r.reserved_quantity)
            .unwrap_or(0);
        return Err(ServiceError::InvalidQuantity(format!(
            "cannot release {} units of product {} at {}, only {} reserved",
            qty, product_id, location, reserved
        )));
    }

    LEDGER_OPERATIONS.with_label_values(&["release"]).inc();
    Ok(())
}

/// Adds on-hand stock, creating the ledger row lazily on the first stock
/// event for the key.
pub(crate) async fn add_stock_on<C: ConnectionTrait>(
    conn: &C,
    location: LocationRef,
    product_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    positive(qty)?;

    let result = InventoryRecords::update_many()
        .col_expr(
            inventory_record::Column::CurrentQuantity,
            Expr::col(inventory_record::Column::CurrentQuantity).add(qty),
        )
        .col_expr(
            inventory_record::Column::LastUpdated,
            Expr::value(Utc::now()),
        )
        .filter(inventory_record::Column::LocationType.eq(location.location_type.to_string()))
        .filter(inventory_record::Column::LocationId.eq(location.id))
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let record = inventory_record::ActiveModel {
            location_type: Set(location.location_type.to_string()),
            location_id: Set(location.id),
            product_id: Set(product_id),
            current_quantity: Set(qty),
            reserved_quantity: Set(0),
            minimum_stock_level: Set(0),
            maximum_stock_level: Set(None),
            reorder_point: Set(0),
            ..Default::default()
        };
        record.insert(conn).await?;
    }

    LEDGER_OPERATIONS.with_label_values(&["add_stock"]).inc();
    Ok(())
}

/// Removes on-hand stock. Reserved units cannot be removed.
pub(crate) async fn remove_stock_on<C: ConnectionTrait>(
    conn: &C,
    location: LocationRef,
    product_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    positive(qty)?;

    let result = InventoryRecords::update_many()
        .col_expr(
            inventory_record::Column::CurrentQuantity,
            Expr::col(inventory_record::Column::CurrentQuantity).sub(qty),
        )
        .col_expr(
            inventory_record::Column::LastUpdated,
            Expr::value(Utc::now()),
        )
        .filter(inventory_record::Column::LocationType.eq(location.location_type.to_string()))
        .filter(inventory_record::Column::LocationId.eq(location.id))
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(
            Expr::expr(
                Expr::col(inventory_record::Column::CurrentQuantity)
                    .sub(Expr::col(inventory_record::Column::ReservedQuantity)),
            )
            .gte(qty),
        )
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        LEDGER_FAILURES.with_label_values(&["remove_stock"]).inc();
        let available = find_record(conn, location, product_id)
            .await?
            .map(|r| r.available_quantity())
            .unwrap_or(0);
        return Err(ServiceError::InsufficientStock(format!(
            "cannot remove {} units of product {} at {}, only {} available",
            qty, product_id, location, available
        )));
    }

    LEDGER_OPERATIONS.with_label_values(&["remove_stock"]).inc();
    Ok(())
}

/// Consumes a reservation: decrements reserved and current together in
/// one statement, guarded by `reserved >= qty AND current >= qty`.
/// This is the commit point for a transfer receipt; it must stay legal
/// even when the key's entire on-hand stock is reserved.
pub(crate) async fn commit_reserved_on<C: ConnectionTrait>(
    conn: &C,
    location: LocationRef,
    product_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    positive(qty)?;

    let result = InventoryRecords::update_many()
        .col_expr(
            inventory_record::Column::ReservedQuantity,
            Expr::col(inventory_record::Column::ReservedQuantity).sub(qty),
        )
        .col_expr(
            inventory_record::Column::CurrentQuantity,
            Expr::col(inventory_record::Column::CurrentQuantity).sub(qty),
        )
        .col_expr(
            inventory_record::Column::LastUpdated,
            Expr::value(Utc::now()),
        )
        .filter(inventory_record::Column::LocationType.eq(location.location_type.to_string()))
        .filter(inventory_record::Column::LocationId.eq(location.id))
        .filter(inventory_record::Column::ProductId.eq(product_id))
        .filter(inventory_record::Column::ReservedQuantity.gte(qty))
        .filter(inventory_record::Column::CurrentQuantity.gte(qty))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        LEDGER_FAILURES.with_label_values(&["commit_reserved"]).inc();
        let reserved = find_record(conn, location, product_id)
            .await?
            .map(|r| r.reserved_quantity)
            .unwrap_or(0);
        return Err(ServiceError::InvalidQuantity(format!(
            "cannot commit {} reserved units of product {} at {}, only {} reserved",
            qty, product_id, location, reserved
        )));
    }

    LEDGER_OPERATIONS
        .with_label_values(&["commit_reserved"])
        .inc();
    Ok(())
}

/// Service owning the per-(location, product) stock counters.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Places a hold on available stock.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        location: LocationRef,
        product_id: Uuid,
        qty: i32,
    ) -> Result<StockSnapshot, ServiceError> {
        reserve_on(&*self.db, location, product_id, qty).await?;
        self.event_sender
            .send(Event::StockReserved {
                location_type: location.location_type.to_string(),
                location_id: location.id,
                product_id,
                quantity: qty,
            })
            .await
            .map_err(ServiceError::EventError)?;
        self.get_quantity(location, product_id).await
    }

    /// Releases a previously placed hold.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        location: LocationRef,
        product_id: Uuid,
        qty: i32,
    ) -> Result<StockSnapshot, ServiceError> {
        release_on(&*self.db, location, product_id, qty).await?;
        self.event_sender
            .send(Event::StockReleased {
                location_type: location.location_type.to_string(),
                location_id: location.id,
                product_id,
                quantity: qty,
            })
            .await
            .map_err(ServiceError::EventError)?;
        self.get_quantity(location, product_id).await
    }

    /// Receives stock into a location (restock path).
    #[instrument(skip(self))]
    pub async fn add_stock(
        &self,
        location: LocationRef,
        product_id: Uuid,
        qty: i32,
    ) -> Result<StockSnapshot, ServiceError> {
        add_stock_on(&*self.db, location, product_id, qty).await?;
        self.event_sender
            .send(Event::StockAdded {
                location_type: location.location_type.to_string(),
                location_id: location.id,
                product_id,
                quantity: qty,
            })
            .await
            .map_err(ServiceError::EventError)?;
        self.get_quantity(location, product_id).await
    }

    /// Withdraws unreserved stock from a location.
    #[instrument(skip(self))]
    pub async fn remove_stock(
        &self,
        location: LocationRef,
        product_id: Uuid,
        qty: i32,
    ) -> Result<StockSnapshot, ServiceError> {
        remove_stock_on(&*self.db, location, product_id, qty).await?;
        self.event_sender
            .send(Event::StockRemoved {
                location_type: location.location_type.to_string(),
                location_id: location.id,
                product_id,
                quantity: qty,
            })
            .await
            .map_err(ServiceError::EventError)?;
        self.get_quantity(location, product_id).await
    }

    /// Current quantity view. A key with no ledger row yet reads as zero
    /// stock; records are created lazily on the first stock event.
    #[instrument(skip(self))]
    pub async fn get_quantity(
        &self,
        location: LocationRef,
        product_id: Uuid,
    ) -> Result<StockSnapshot, ServiceError> {
        let record = find_record(&*self.db, location, product_id).await?;
        Ok(match record {
            Some(model) => StockSnapshot::from(model),
            None => StockSnapshot {
                location_type: location.location_type.to_string(),
                location_id: location.id,
                product_id,
                current_quantity: 0,
                reserved_quantity: 0,
                available_quantity: 0,
                as_of: Utc::now(),
            },
        })
    }

    /// Sets replenishment levels for a key, creating the row if needed.
    #[instrument(skip(self))]
    pub async fn set_stock_levels(
        &self,
        location: LocationRef,
        product_id: Uuid,
        minimum: i32,
        maximum: Option<i32>,
        reorder_point: i32,
    ) -> Result<inventory_record::Model, ServiceError> {
        if minimum < 0 || reorder_point < 0 || maximum.map_or(false, |m| m < minimum) {
            return Err(ServiceError::ValidationError(
                "stock levels must be non-negative and maximum must not be below minimum"
                    .to_string(),
            ));
        }

        let existing = find_record(&*self.db, location, product_id).await?;
        let model = match existing {
            Some(model) => {
                let mut active: inventory_record::ActiveModel = model.into();
                active.minimum_stock_level = Set(minimum);
                active.maximum_stock_level = Set(maximum);
                active.reorder_point = Set(reorder_point);
                active.update(&*self.db).await?
            }
            None => {
                let record = inventory_record::ActiveModel {
                    location_type: Set(location.location_type.to_string()),
                    location_id: Set(location.id),
                    product_id: Set(product_id),
                    current_quantity: Set(0),
                    reserved_quantity: Set(0),
                    minimum_stock_level: Set(minimum),
                    maximum_stock_level: Set(maximum),
                    reorder_point: Set(reorder_point),
                    ..Default::default()
                };
                record.insert(&*self.db).await?
            }
        };

        info!(
            location = %location,
            product_id = %product_id,
            reorder_point,
            "Updated stock levels"
        );
        Ok(model)
    }

    /// Records whose available quantity has fallen to or below their
    /// reorder point, optionally scoped to one location.
    #[instrument(skip(self))]
    pub async fn list_low_stock(
        &self,
        location: Option<LocationRef>,
    ) -> Result<Vec<inventory_record::Model>, ServiceError> {
        let mut query = InventoryRecords::find().filter(
            Expr::expr(
                Expr::col(inventory_record::Column::CurrentQuantity)
                    .sub(Expr::col(inventory_record::Column::ReservedQuantity)),
            )
            .lte(Expr::col(inventory_record::Column::ReorderPoint)),
        );
        if let Some(location) = location {
            query = query
                .filter(
                    inventory_record::Column::LocationType
                        .eq(location.location_type.to_string()),
                )
                .filter(inventory_record::Column::LocationId.eq(location.id));
        }
        let records = query.all(&*self.db).await?;
        Ok(records)
    }
}
