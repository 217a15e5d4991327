//! New-listing detection and risk-gated execution service.
//!
//! Orchestrates all components:
//! - Ticker feed connection with REST poll fallback
//! - Baseline capture and listing candidates
//! - Exactly-once listing detection
//! - Risk-gated order execution (dry-run or live)
//! - Status, trade history, risk metrics and config updates

pub mod app;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod status;

pub use app::{ListingService, Stores};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use pipeline::{ListingPipeline, PipelineStats};
pub use status::{Health, RiskMetrics, ServiceStatus};
