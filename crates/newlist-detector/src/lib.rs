//! Exactly-once listing detection.
//!
//! A bounded in-process cache answers repeat observations; the store's
//! (symbol, listed_at) uniqueness constraint is the sole arbiter for
//! everything else, including concurrent feed and poll callers.

pub mod cache;
pub mod config;
pub mod detector;
pub mod error;

pub use cache::DedupCache;
pub use config::DetectorConfig;
pub use detector::{DetectionOutcome, DetectorStats, ListingDetector};
pub use error::{DetectorError, DetectorResult};
