use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Privileged actions a one-time grant can authorize.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    AddItem,
    EditItem,
    DeleteItem,
    ManageSupply,
    TransferApproval,
}

/// A credential valid for exactly one use within a bounded time window.
///
/// Expires after the configured TTL even if unused. `is_expired` is a
/// bookkeeping flag maintained by the sweeper; validity always re-checks
/// the clock so a stale flag cannot extend a grant's life.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "one_time_permissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub granted_to_user_id: Uuid,
    pub granted_by_user_id: Uuid,
    pub permission_type: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub is_used: bool,
    pub is_expired: bool,
    /// Optional store scope for store-bound grants.
    pub store_id: Option<Uuid>,
}

impl Model {
    pub fn permission_type(&self) -> Option<PermissionType> {
        use std::str::FromStr;
        PermissionType::from_str(&self.permission_type).ok()
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_expired && now < self.expires_at
    }

    /// Unused, unexpired grants past their deadline are due for the sweep.
    pub fn should_be_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_expired && now > self.expires_at
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
            if let ActiveValue::NotSet = active_model.granted_at {
                active_model.granted_at = Set(Utc::now());
            }
        }
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(expires_in: Duration) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            granted_to_user_id: Uuid::new_v4(),
            granted_by_user_id: Uuid::new_v4(),
            permission_type: PermissionType::TransferApproval.to_string(),
            granted_at: now,
            expires_at: now + expires_in,
            used_at: None,
            is_used: false,
            is_expired: false,
            store_id: None,
        }
    }

    #[test]
    fn valid_only_while_unused_and_in_window() {
        let now = Utc::now();
        let fresh = grant(Duration::hours(1));
        assert!(fresh.is_valid(now));

        let mut used = grant(Duration::hours(1));
        used.is_used = true;
        used.used_at = Some(now);
        assert!(!used.is_valid(now));

        let stale = grant(Duration::seconds(-5));
        assert!(!stale.is_valid(now));
        assert!(stale.should_be_expired(now));
    }

    #[test]
    fn stale_expiry_flag_cannot_revive_a_grant() {
        // Sweeper missed this row; the clock check still rejects it.
        let now = Utc::now();
        let stale = grant(Duration::seconds(-1));
        assert!(!stale.is_expired);
        assert!(!stale.is_valid(now));
    }

    #[test]
    fn permission_type_round_trip() {
        use std::str::FromStr;
        assert_eq!(
            PermissionType::TransferApproval.to_string(),
            "TRANSFER_APPROVAL"
        );
        assert_eq!(
            PermissionType::from_str("MANAGE_SUPPLY").unwrap(),
            PermissionType::ManageSupply
        );
    }
}
