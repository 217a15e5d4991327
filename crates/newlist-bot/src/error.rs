//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] newlist_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] newlist_feed::FeedError),

    #[error("Detector error: {0}")]
    Detector(#[from] newlist_detector::DetectorError),

    #[error("Risk error: {0}")]
    Risk(#[from] newlist_risk::RiskError),

    #[error("Executor error: {0}")]
    Executor(#[from] newlist_executor::ExecutorError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] newlist_executor::GatewayError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] newlist_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] newlist_persistence::PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
