//! Prometheus metrics and structured logging for the new-listing bot.
//!
//! - Prometheus metrics for the feed connection, listing detection,
//!   risk rejections and trade outcomes
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
