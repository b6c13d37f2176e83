use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_PERMISSION_TTL_SECS: u64 = 3600;
const DEFAULT_PERMISSION_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_permission_ttl_secs() -> u64 {
    DEFAULT_PERMISSION_TTL_SECS
}

fn default_permission_sweep_interval_secs() -> u64 {
    DEFAULT_PERMISSION_SWEEP_INTERVAL_SECS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

/// Application configuration with validation.
///
/// Values are layered from `config/default.toml`, then
/// `config/<environment>.toml`, then `APP__`-prefixed environment
/// variables (e.g. `APP__DATABASE_URL`).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "database_url must not be empty"))]
    pub database_url: String,

    /// Maximum number of pooled database connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 512))]
    pub db_max_connections: u32,

    /// Minimum number of pooled database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Run migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Deployment environment name ("development", "test", "production")
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level directive for the tracing subscriber
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON instead of human-readable lines
    #[serde(default)]
    pub log_json: bool,

    /// Lifetime of a one-time permission grant, in seconds
    #[serde(default = "default_permission_ttl_secs")]
    #[validate(range(min = 1, message = "permission_ttl_secs must be at least 1"))]
    pub permission_ttl_secs: u64,

    /// Interval between permission expiry sweeps, in seconds
    #[serde(default = "default_permission_sweep_interval_secs")]
    pub permission_sweep_interval_secs: u64,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Constructs a configuration directly, bypassing file/env layering.
    /// Primarily used by tests and embedders.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            auto_migrate: false,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            permission_ttl_secs: default_permission_ttl_secs(),
            permission_sweep_interval_secs: default_permission_sweep_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn permission_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.permission_ttl_secs as i64)
    }

    pub fn permission_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.permission_sweep_interval_secs)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads the layered application configuration.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://stockflow.db?mode=rwc")?
        .set_default("environment", run_env.clone())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
