//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A uniqueness constraint rejected the write. Expected outcome for dedup.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Store is unreachable (pool closed, simulated outage).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A stored row could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Map a write error, lifting constraint violations into `UniqueViolation`.
    pub fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::UniqueViolation(
                    db_err.constraint().unwrap_or("unique").to_string(),
                );
            }
        }
        Self::Database(err)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<newlist_core::CoreError> for PersistenceError {
    fn from(err: newlist_core::CoreError) -> Self {
        match err {
            newlist_core::CoreError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            other => Self::Corrupt(other.to_string()),
        }
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
