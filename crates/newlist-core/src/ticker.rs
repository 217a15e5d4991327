//! Parsed ticker event.

use crate::listing::{normalize_symbol, ListingSource};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest price for one symbol, from the feed or the REST poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerEvent {
    pub symbol: String,
    pub price: Decimal,
    /// Exchange event time (feed) or observation time (poll).
    pub timestamp: DateTime<Utc>,
    pub source: ListingSource,
}

impl TickerEvent {
    pub fn new(
        symbol: &str,
        price: Decimal,
        timestamp: DateTime<Utc>,
        source: ListingSource,
    ) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            price,
            timestamp,
            source,
        }
    }
}
