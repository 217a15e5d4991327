//! Risk error types.

use newlist_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Trade config unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Exposure unavailable: {0}")]
    ExposureUnavailable(#[source] PersistenceError),
}

pub type RiskResult<T> = Result<T, RiskError>;
