//! Last traded price per symbol.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use newlist_core::listing::normalize_symbol;
use newlist_core::TickerEvent;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePoint {
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// Latest price per symbol, updated from every ticker source.
#[derive(Default)]
pub struct PriceBook {
    prices: DashMap<String, PricePoint>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a ticker. Non-positive prices and out-of-order ticks are ignored.
    pub fn update(&self, event: &TickerEvent) {
        if event.price <= Decimal::ZERO {
            return;
        }
        let point = PricePoint {
            price: event.price,
            at: event.timestamp,
        };
        self.prices
            .entry(event.symbol.clone())
            .and_modify(|existing| {
                if point.at >= existing.at {
                    *existing = point;
                }
            })
            .or_insert(point);
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.get(symbol).map(|p| p.price)
    }

    pub fn get(&self, symbol: &str) -> Option<PricePoint> {
        self.prices.get(&normalize_symbol(symbol)).map(|p| *p)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use newlist_core::ListingSource;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal, ms: i64) -> TickerEvent {
        TickerEvent::new(
            symbol,
            price,
            Utc.timestamp_millis_opt(ms).unwrap(),
            ListingSource::Feed,
        )
    }

    #[test]
    fn test_latest_price_wins() {
        let book = PriceBook::new();
        book.update(&tick("NEWUSDT", dec!(1.0), 1_000));
        book.update(&tick("NEWUSDT", dec!(1.2), 2_000));
        book.update(&tick("NEWUSDT", dec!(0.9), 1_500));
        assert_eq!(book.price("newusdt"), Some(dec!(1.2)));
    }

    #[test]
    fn test_non_positive_ignored() {
        let book = PriceBook::new();
        book.update(&tick("NEWUSDT", dec!(0), 1_000));
        assert!(book.price("NEWUSDT").is_none());
        assert!(book.is_empty());
    }
}
