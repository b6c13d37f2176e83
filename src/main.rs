use tokio::signal;
use tracing::{error, info};

use stockflow::services::permissions::spawn_permission_sweeper;
use stockflow::{config, logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    logging::init_tracing(&cfg.log_level, cfg.log_json);

    info!(environment = %cfg.environment, "Starting stockflow core");

    let sweep_interval = cfg.permission_sweep_interval();
    let (state, event_rx) = AppState::new(cfg).await.map_err(|e| {
        error!("Failed to initialise application state: {}", e);
        e
    })?;

    let event_task = tokio::spawn(stockflow::events::process_events(event_rx));
    let sweeper = spawn_permission_sweeper(state.permissions.clone(), sweep_interval);

    info!("Stockflow core running; press Ctrl-C to stop");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweeper.abort();
    drop(state);
    let _ = event_task.await;

    Ok(())
}
