//! Detector error types.

use newlist_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Store failure other than the uniqueness constraint. Never a duplicate.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type DetectorResult<T> = Result<T, DetectorError>;
