//! Pre-trade risk gate for the new-listing bot.
//!
//! Every prospective trade is checked against the latest `TradeConfig`
//! and the current open buy exposure:
//! - TradingDisabled: auto trading off or config unavailable
//! - InvalidInputs: non-positive price or quantity
//! - MaxTradeAmount: value above the per-trade cap is clamped, not refused
//! - MaxPosition: projected exposure above the position cap
//! - ExposureUnavailable: exposure could not be read
//!
//! The gate never approves without knowing both limits and exposure.

pub mod error;
pub mod gate;

pub use error::{RiskError, RiskResult};
pub use gate::{RiskDecision, RiskGate, RiskReason};
