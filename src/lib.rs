//! Stockflow core library.
//!
//! Multi-location inventory control for a multi-tenant retail operation:
//! a per-(location, product) stock ledger, a supervised transfer
//! workflow, one-time permission grants for privileged transitions, and
//! a hash-chained audit trail. The service layer is the exposed API;
//! request mapping, identity resolution and notification delivery live
//! in collaborating systems.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use crate::errors::ServiceError;
pub use crate::services::audit::AuditContext;

/// Wired-up application state: database handle plus all services.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub inventory: services::inventory::InventoryService,
    pub transfers: services::transfers::TransferService,
    pub audit: services::audit::AuditService,
    pub permissions: services::permissions::PermissionService,
}

impl AppState {
    /// Builds the service graph over an established connection pool.
    /// Returns the state and the receiving end of the event channel; the
    /// caller decides where `events::process_events` runs.
    pub fn from_pool(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
    ) -> (Self, mpsc::Receiver<events::Event>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = events::EventSender::new(event_tx);

        let audit = services::audit::AuditService::new(db.clone());
        let permissions = services::permissions::PermissionService::new(
            db.clone(),
            event_sender.clone(),
            config.permission_ttl(),
        );
        let inventory =
            services::inventory::InventoryService::new(db.clone(), event_sender.clone());
        let transfers = services::transfers::TransferService::new(
            db.clone(),
            event_sender.clone(),
            audit.clone(),
            permissions.clone(),
        );

        (
            Self {
                db,
                config,
                event_sender,
                inventory,
                transfers,
                audit,
                permissions,
            },
            event_rx,
        )
    }

    /// Connects to the configured database, optionally migrates, and
    /// builds the service graph.
    pub async fn new(
        config: config::AppConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<events::Event>)> {
        let pool = db::establish_connection_from_app_config(&config).await?;
        if config.auto_migrate {
            db::run_migrations(&pool).await?;
        }
        Ok(Self::from_pool(Arc::new(pool), config))
    }
}
