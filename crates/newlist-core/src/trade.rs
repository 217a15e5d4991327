//! Trade attempt audit record.
//!
//! One `TradeAttempt` is created per execution attempt. It starts either
//! directly in a terminal status (rejected, dry-run fill) or as `pending`
//! before a live exchange call, and is immutable once terminal.

use crate::error::CoreError;
use crate::order::{ClientOrderId, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TradeMode {
    /// Simulate the outcome without contacting the exchange.
    #[default]
    #[serde(rename = "dry-run", alias = "dry_run")]
    DryRun,
    #[serde(rename = "live")]
    Live,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry-run" | "dry_run" => Ok(Self::DryRun),
            "live" => Ok(Self::Live),
            _ => Err(CoreError::UnknownVariant {
                kind: "trade mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a trade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Filled,
    Rejected,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses are never overwritten.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "filled" => Ok(Self::Filled),
            "rejected" => Ok(Self::Rejected),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::UnknownVariant {
                kind: "trade status",
                value: s.to_string(),
            }),
        }
    }
}

/// Audit record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeAttempt {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    /// Order size in quote currency.
    pub quote_qty: Decimal,
    /// Executed size in base units, when known.
    pub base_qty: Option<Decimal>,
    pub latency_ms: u64,
    pub mode: TradeMode,
    pub status: TradeStatus,
    pub error_reason: Option<String>,
    pub exchange_order_id: Option<String>,
    /// Idempotency key shared by every retry of this attempt.
    pub client_order_id: ClientOrderId,
    /// Exchange calls made beyond the first.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl TradeAttempt {
    /// New attempt in `pending` status.
    pub fn pending(symbol: &str, side: OrderSide, quote_qty: Decimal, mode: TradeMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quote_qty,
            base_qty: None,
            latency_ms: 0,
            mode,
            status: TradeStatus::Pending,
            error_reason: None,
            exchange_order_id: None,
            client_order_id: ClientOrderId::new(),
            retries: 0,
            created_at: Utc::now(),
        }
    }

    /// Attempt refused before any exchange call.
    pub fn rejected(
        symbol: &str,
        side: OrderSide,
        quote_qty: Decimal,
        mode: TradeMode,
        reason: impl Into<String>,
    ) -> Self {
        let mut attempt = Self::pending(symbol, side, quote_qty, mode);
        attempt.status = TradeStatus::Rejected;
        attempt.error_reason = Some(reason.into());
        attempt
    }

    /// Mark as filled.
    pub fn fill(&mut self, exchange_order_id: impl Into<String>, base_qty: Option<Decimal>) {
        self.status = TradeStatus::Filled;
        self.exchange_order_id = Some(exchange_order_id.into());
        self.base_qty = base_qty;
        self.error_reason = None;
    }

    /// Mark as failed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = TradeStatus::Failed;
        self.error_reason = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
