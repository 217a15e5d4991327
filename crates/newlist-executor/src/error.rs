//! Executor error types.
//!
//! Exchange failures are not errors at this level: they end up as a
//! `failed` `TradeAttempt`. Only precondition failures surface here.

use newlist_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Invalid trade request: {0}")]
    InvalidRequest(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
