//! One-time permission gate.
//!
//! Issues short-lived, single-use grants for privileged actions and
//! consumes them with compare-and-set semantics: under concurrent
//! consumption of the same grant, exactly one caller wins.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::one_time_permission::{self, Entity as OneTimePermissions, PermissionType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Service managing one-time permission grants.
#[derive(Clone)]
pub struct PermissionService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_ttl: Duration,
}

impl PermissionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_ttl: Duration,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_ttl,
        }
    }

    /// Grants a one-time permission. Expires after `ttl` (or the
    /// configured default) even if never used.
    #[instrument(skip(self))]
    pub async fn grant(
        &self,
        granted_to: Uuid,
        granted_by: Uuid,
        permission_type: PermissionType,
        ttl: Option<Duration>,
        store_scope: Option<Uuid>,
    ) -> Result<one_time_permission::Model, ServiceError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() {
            return Err(ServiceError::ValidationError(
                "permission TTL must be positive".to_string(),
            ));
        }

        let now = Utc::now();
        let grant = one_time_permission::ActiveModel {
            granted_to_user_id: Set(granted_to),
            granted_by_user_id: Set(granted_by),
            permission_type: Set(permission_type.to_string()),
            granted_at: Set(now),
            expires_at: Set(now + ttl),
            used_at: Set(None),
            is_used: Set(false),
            is_expired: Set(false),
            store_id: Set(store_scope),
            ..Default::default()
        };
        let saved = grant.insert(&*self.db).await?;

        info!(
            permission_id = %saved.id,
            granted_to = %granted_to,
            permission_type = %permission_type,
            expires_at = %saved.expires_at,
            "Permission granted"
        );
        self.event_sender
            .send(Event::PermissionGranted(saved.id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(saved)
    }

    /// Consumes a grant. The validity check and the used-flag write are
    /// one conditional UPDATE, so exactly one of any number of concurrent
    /// callers observes success.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        permission_id: Uuid,
    ) -> Result<one_time_permission::Model, ServiceError> {
        let consumed = self.consume_on(&*self.db, permission_id).await?;
        self.event_sender
            .send(Event::PermissionConsumed(permission_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(consumed)
    }

    pub(crate) async fn consume_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        permission_id: Uuid,
    ) -> Result<one_time_permission::Model, ServiceError> {
        let now = Utc::now();

        let result = OneTimePermissions::update_many()
            .col_expr(one_time_permission::Column::IsUsed, Expr::value(true))
            .col_expr(one_time_permission::Column::UsedAt, Expr::value(Some(now)))
            .filter(one_time_permission::Column::Id.eq(permission_id))
            .filter(one_time_permission::Column::IsUsed.eq(false))
            .filter(one_time_permission::Column::IsExpired.eq(false))
            .filter(one_time_permission::Column::ExpiresAt.gt(now))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race or never eligible; read the row to say why.
            let row = OneTimePermissions::find_by_id(permission_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("permission {} not found", permission_id))
                })?;
            if row.is_used {
                return Err(ServiceError::PermissionAlreadyUsed(format!(
                    "permission {} was already used at {}",
                    permission_id,
                    row.used_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                )));
            }
            return Err(ServiceError::PermissionExpired(format!(
                "permission {} expired at {}",
                permission_id, row.expires_at
            )));
        }

        let consumed = OneTimePermissions::find_by_id(permission_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("permission {} not found", permission_id))
            })?;
        info!(permission_id = %permission_id, "Permission consumed");
        Ok(consumed)
    }

    /// Consumes the oldest active grant of `permission_type` held by
    /// `user_id`.
    #[instrument(skip(self))]
    pub async fn consume_for_user(
        &self,
        user_id: Uuid,
        permission_type: PermissionType,
    ) -> Result<one_time_permission::Model, ServiceError> {
        let now = Utc::now();
        let grant = OneTimePermissions::find()
            .filter(one_time_permission::Column::GrantedToUserId.eq(user_id))
            .filter(one_time_permission::Column::PermissionType.eq(permission_type.to_string()))
            .filter(one_time_permission::Column::IsUsed.eq(false))
            .filter(one_time_permission::Column::IsExpired.eq(false))
            .filter(one_time_permission::Column::ExpiresAt.gt(now))
            .order_by_asc(one_time_permission::Column::GrantedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no active {} permission found for user {}",
                    permission_type, user_id
                ))
            })?;
        self.consume(grant.id).await
    }

    pub async fn get(
        &self,
        permission_id: Uuid,
    ) -> Result<Option<one_time_permission::Model>, ServiceError> {
        let row = OneTimePermissions::find_by_id(permission_id)
            .one(&*self.db)
            .await?;
        Ok(row)
    }

    /// All grants currently usable by `user_id`.
    #[instrument(skip(self))]
    pub async fn active_permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<one_time_permission::Model>, ServiceError> {
        let now = Utc::now();
        let rows = OneTimePermissions::find()
            .filter(one_time_permission::Column::GrantedToUserId.eq(user_id))
            .filter(one_time_permission::Column::IsUsed.eq(false))
            .filter(one_time_permission::Column::IsExpired.eq(false))
            .filter(one_time_permission::Column::ExpiresAt.gt(now))
            .order_by_desc(one_time_permission::Column::GrantedAt)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    pub async fn has_active_permission(
        &self,
        user_id: Uuid,
        permission_type: PermissionType,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let row = OneTimePermissions::find()
            .filter(one_time_permission::Column::GrantedToUserId.eq(user_id))
            .filter(one_time_permission::Column::PermissionType.eq(permission_type.to_string()))
            .filter(one_time_permission::Column::IsUsed.eq(false))
            .filter(one_time_permission::Column::IsExpired.eq(false))
            .filter(one_time_permission::Column::ExpiresAt.gt(now))
            .one(&*self.db)
            .await?;
        Ok(row.is_some())
    }

    /// Marks grants past their deadline as expired. Purely bookkeeping:
    /// `consume` re-checks the clock, so a missed sweep cannot extend a
    /// grant's life.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = OneTimePermissions::update_many()
            .col_expr(one_time_permission::Column::IsExpired, Expr::value(true))
            .filter(one_time_permission::Column::IsUsed.eq(false))
            .filter(one_time_permission::Column::IsExpired.eq(false))
            .filter(one_time_permission::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(expired = result.rows_affected, "Swept expired permissions");
            self.event_sender
                .send(Event::PermissionsSwept {
                    expired_count: result.rows_affected,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(result.rows_affected)
    }
}

/// Runs `sweep_expired` on a fixed interval until the task is aborted.
pub fn spawn_permission_sweeper(
    service: PermissionService,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match service.sweep_expired().await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "Permission sweep completed"),
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(error = %e, "Permission sweep failed; will retry");
                    } else {
                        error!(error = %e, "Permission sweep failed");
                    }
                }
            }
        }
    })
}
