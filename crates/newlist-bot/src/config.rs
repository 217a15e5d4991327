//! Application configuration.

use std::path::Path;

use newlist_core::{TradeConfig, TradeMode};
use newlist_detector::DetectorConfig;
use newlist_executor::{ApiCredentials, ExecutorConfig, ExecutorError};
use newlist_ws::FeedConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "NEWLIST_CONFIG";
/// Fallback config path.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const API_KEY_ENV: &str = "NEWLIST_API_KEY";
pub const API_SECRET_ENV: &str = "NEWLIST_API_SECRET";

/// Exchange REST endpoints: signed trading API and the ticker poll fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_url")]
    pub url: String,
    /// `recvWindow` sent with signed requests.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_poll_enabled")]
    pub poll_enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll request timeout.
    #[serde(default = "default_rest_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_poll_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_rest_timeout_ms() -> u64 {
    10_000
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            url: default_rest_url(),
            recv_window_ms: default_recv_window_ms(),
            poll_enabled: default_poll_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_rest_timeout_ms(),
        }
    }
}

/// Storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Postgres URL. In-memory store when absent.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Directory for the daily JSON Lines trade journal. Disabled when absent.
    #[serde(default)]
    pub journal_dir: Option<String>,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            journal_dir: None,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Execution mode for listing-triggered trades.
    #[serde(default)]
    pub mode: TradeMode,
    /// Streaming ticker feed.
    #[serde(default)]
    pub ws: FeedConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Limits written to the config store when it holds no record yet.
    #[serde(default)]
    pub trade: TradeConfig,
}

impl AppConfig {
    /// Config path: CLI argument, then `NEWLIST_CONFIG`, then the default.
    pub fn resolve_path(cli: Option<String>) -> String {
        cli.or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_live(&self) -> bool {
        self.mode == TradeMode::Live
    }

    /// Check values serde defaults cannot guard.
    pub fn validate(&self) -> AppResult<()> {
        if self.ws.url.trim().is_empty() {
            return Err(AppError::Config("ws.url must not be empty".to_string()));
        }
        if self.ws.streams.is_empty() {
            return Err(AppError::Config("ws.streams must not be empty".to_string()));
        }
        if self.rest.url.trim().is_empty() {
            return Err(AppError::Config("rest.url must not be empty".to_string()));
        }
        if self.rest.poll_enabled && self.rest.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "rest.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.executor.listing_quote_qty <= Decimal::ZERO {
            return Err(AppError::Config(
                "executor.listing_quote_qty must be positive".to_string(),
            ));
        }
        self.detector
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        self.trade
            .validate()
            .map_err(|e| AppError::Config(format!("trade: {e}")))?;
        Ok(())
    }

    /// API credentials from `NEWLIST_API_KEY` / `NEWLIST_API_SECRET`.
    ///
    /// Required in live mode; optional otherwise.
    pub fn load_credentials(&self) -> AppResult<Option<ApiCredentials>> {
        resolve_credentials(
            self.mode,
            ApiCredentials::from_env(API_KEY_ENV, API_SECRET_ENV),
        )
    }
}

fn resolve_credentials(
    mode: TradeMode,
    loaded: Result<ApiCredentials, ExecutorError>,
) -> AppResult<Option<ApiCredentials>> {
    match (mode, loaded) {
        (_, Ok(credentials)) => Ok(Some(credentials)),
        (TradeMode::Live, Err(e)) => Err(AppError::Config(format!(
            "live mode requires API credentials: {e}"
        ))),
        (TradeMode::DryRun, Err(_)) => Ok(None),
    }
}
