use std::sync::Arc;

use stockflow::config::AppConfig;
use stockflow::entities::inventory_record::LocationRef;
use stockflow::events::process_events;
use stockflow::services::audit::AuditContext;
use stockflow::{db, AppState};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Test harness backed by an in-memory SQLite database.
///
/// The pool is pinned to a single connection so the in-memory database
/// survives for the whole test and concurrent operations serialize the
/// way short row-locked transactions do on a real backend.
pub struct TestApp {
    pub state: AppState,
    _event_task: JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations failed");

        let (state, event_rx) = AppState::from_pool(Arc::new(pool), cfg);
        let event_task = tokio::spawn(process_events(event_rx));

        Self {
            state,
            _event_task: event_task,
        }
    }

    /// Audit context for a fixed operator within `company_id`.
    pub fn ctx(&self, company_id: Uuid) -> AuditContext {
        AuditContext::new("ops@example.com", Some(Uuid::new_v4()), company_id)
    }

    /// Puts `qty` units of `product_id` on hand at `location`.
    pub async fn seed_stock(&self, location: LocationRef, product_id: Uuid, qty: i32) {
        self.state
            .inventory
            .add_stock(location, product_id, qty)
            .await
            .expect("seeding stock failed");
    }
}
