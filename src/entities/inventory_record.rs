use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Kind of stock-holding location.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationType {
    Store,
    Warehouse,
}

/// A concrete location: kind plus directory id.
///
/// Location identities come from the external catalog; the core only
/// stores and compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRef {
    pub location_type: LocationType,
    pub id: Uuid,
}

impl LocationRef {
    pub fn store(id: Uuid) -> Self {
        Self {
            location_type: LocationType::Store,
            id,
        }
    }

    pub fn warehouse(id: Uuid) -> Self {
        Self {
            location_type: LocationType::Warehouse,
            id,
        }
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location_type, self.id)
    }
}

/// Per-(location, product) stock counters.
///
/// `current_quantity` is the physical on-hand count; `reserved_quantity`
/// is the portion spoken for by open transfers. The available quantity is
/// derived, never stored. Rows are created lazily on the first stock
/// event for a key and are never deleted, only zeroed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub location_type: String,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub current_quantity: i32,
    pub reserved_quantity: i32,
    pub minimum_stock_level: i32,
    pub maximum_stock_level: Option<i32>,
    pub reorder_point: i32,
    pub last_updated: DateTime<Utc>,
}

impl Model {
    /// Units on hand that are not reserved.
    pub fn available_quantity(&self) -> i32 {
        self.current_quantity - self.reserved_quantity
    }

    pub fn is_below_reorder_point(&self) -> bool {
        self.available_quantity() <= self.reorder_point
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
        if insert {
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }
        active_model.last_updated = Set(Utc::now());
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_quantity_is_derived() {
        let record = Model {
            id: Uuid::new_v4(),
            location_type: LocationType::Warehouse.to_string(),
            location_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            current_quantity: 100,
            reserved_quantity: 30,
            minimum_stock_level: 0,
            maximum_stock_level: None,
            reorder_point: 10,
            last_updated: Utc::now(),
        };
        assert_eq!(record.available_quantity(), 70);
        assert!(!record.is_below_reorder_point());
    }

    #[test]
    fn location_type_round_trips_through_storage_form() {
        use std::str::FromStr;
        assert_eq!(LocationType::Warehouse.to_string(), "WAREHOUSE");
        assert_eq!(
            LocationType::from_str("STORE").unwrap(),
            LocationType::Store
        );
        assert!(LocationType::from_str("TRUCK").is_err());
    }
}
