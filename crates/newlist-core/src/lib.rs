//! Core domain types for the new-listing bot.
//!
//! This crate provides fundamental types used throughout the system:
//! - `ListingRecord`, `ListingKey`: detected listings and their dedup key
//! - `TradeAttempt`: the audit record of one execution attempt
//! - `TradeConfig`: trading limits, with partial updates and validation
//! - `TickerEvent`: a parsed ticker from the feed or the REST poller
//! - `OrderSide`, `ClientOrderId`: trading enums and identifiers

pub mod config;
pub mod error;
pub mod listing;
pub mod order;
pub mod ticker;
pub mod trade;

pub use config::{TradeConfig, TradeConfigUpdate};
pub use error::{CoreError, Result};
pub use listing::{ListingKey, ListingRecord, ListingSource};
pub use order::{ClientOrderId, OrderSide};
pub use ticker::TickerEvent;
pub use trade::{TradeAttempt, TradeMode, TradeStatus};
