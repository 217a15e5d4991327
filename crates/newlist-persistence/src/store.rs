//! Store traits.
//!
//! Async methods return boxed futures so the traits stay dyn-compatible
//! and can be shared as `Arc<dyn ...>` across the detector, executor and
//! risk gate.

use std::future::Future;
use std::pin::Pin;

use newlist_core::{
    ListingKey, ListingRecord, TradeAttempt, TradeConfig, TradeConfigUpdate, TradeMode,
    TradeStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable listings table with a uniqueness constraint on (symbol, listed_at).
pub trait ListingStore: Send + Sync {
    /// Insert a listing. Fails with `UniqueViolation` when the key exists.
    fn insert_listing<'a>(&'a self, record: &'a ListingRecord)
        -> BoxFuture<'a, PersistenceResult<()>>;

    fn find_listing<'a>(
        &'a self,
        key: &'a ListingKey,
    ) -> BoxFuture<'a, PersistenceResult<Option<ListingRecord>>>;

    /// Most recently created listings, newest first.
    fn recent_listings(&self, limit: usize) -> BoxFuture<'_, PersistenceResult<Vec<ListingRecord>>>;

    fn count_listings(&self) -> BoxFuture<'_, PersistenceResult<u64>>;
}

/// Filter and page for trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQuery {
    #[serde(default)]
    pub mode: Option<TradeMode>,
    #[serde(default)]
    pub status: Option<TradeStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for TradeQuery {
    fn default() -> Self {
        Self {
            mode: None,
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl TradeQuery {
    pub fn matches(&self, attempt: &TradeAttempt) -> bool {
        self.mode.map_or(true, |m| m == attempt.mode)
            && self.status.map_or(true, |s| s == attempt.status)
    }
}

/// Aggregates over the trade audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    /// Attempts in a terminal status, all modes.
    pub terminal: u64,
    pub filled: u64,
    pub rejected: u64,
    pub failed: u64,
    /// Mean latency of filled live attempts.
    pub avg_live_latency_ms: Option<f64>,
}

impl TradeStats {
    /// Fraction of terminal attempts that filled.
    pub fn win_rate(&self) -> Option<f64> {
        if self.terminal == 0 {
            None
        } else {
            Some(self.filled as f64 / self.terminal as f64)
        }
    }
}

/// Append-only trade audit trail.
pub trait TradeStore: Send + Sync {
    fn insert_trade<'a>(&'a self, attempt: &'a TradeAttempt)
        -> BoxFuture<'a, PersistenceResult<()>>;

    /// Write the terminal outcome of a pending attempt.
    ///
    /// Guarded on the stored row still being `pending`: returns `false`
    /// (and changes nothing) when the row is already terminal or missing.
    fn finalize_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<bool>>;

    /// Newest first.
    fn list_trades<'a>(
        &'a self,
        query: &'a TradeQuery,
    ) -> BoxFuture<'a, PersistenceResult<Vec<TradeAttempt>>>;

    fn trade_stats(&self) -> BoxFuture<'_, PersistenceResult<TradeStats>>;
}

/// Aggregate open buy exposure, in quote currency.
pub trait ExposureSource: Send + Sync {
    /// Per symbol: filled live buys minus filled live sells, floored at
    /// zero, summed across symbols.
    fn open_buy_exposure(&self) -> BoxFuture<'_, PersistenceResult<Decimal>>;
}

/// Single-row trading limits.
pub trait ConfigStore: Send + Sync {
    /// `None` when the record was never written.
    fn load_config(&self) -> BoxFuture<'_, PersistenceResult<Option<TradeConfig>>>;

    /// Validated last-write-wins merge. The stored record is unchanged on error.
    fn update_config<'a>(
        &'a self,
        update: &'a TradeConfigUpdate,
    ) -> BoxFuture<'a, PersistenceResult<TradeConfig>>;

    /// Write `initial` if no record exists; returns the effective record.
    fn seed_config<'a>(
        &'a self,
        initial: &'a TradeConfig,
    ) -> BoxFuture<'a, PersistenceResult<TradeConfig>>;
}

/// Net filled live exposure from a set of attempts.
pub(crate) fn net_exposure<'a>(attempts: impl Iterator<Item = &'a TradeAttempt>) -> Decimal {
    use std::collections::HashMap;

    let mut per_symbol: HashMap<&str, Decimal> = HashMap::new();
    for attempt in attempts {
        if attempt.status != TradeStatus::Filled || attempt.mode != TradeMode::Live {
            continue;
        }
        let entry = per_symbol.entry(attempt.symbol.as_str()).or_default();
        *entry += attempt.quote_qty * Decimal::from(attempt.side.sign());
    }
    per_symbol
        .values()
        .map(|net| (*net).max(Decimal::ZERO))
        .sum()
}
