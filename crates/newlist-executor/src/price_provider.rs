//! Price lookup for sizing orders.

use std::collections::HashMap;

use newlist_feed::PriceBook;
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Latest known price of a symbol.
pub trait PriceProvider: Send + Sync {
    fn last_price(&self, symbol: &str) -> Option<Decimal>;
}

impl PriceProvider for PriceBook {
    fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.price(symbol)
    }
}

/// Fixed prices, for tests and manual runs.
#[derive(Debug, Default)]
pub struct StaticPrices {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, price: Decimal) {
        self.prices.write().insert(symbol.to_uppercase(), price);
    }
}

impl PriceProvider for StaticPrices {
    fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().get(&symbol.to_uppercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use newlist_core::{ListingSource, TickerEvent};
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_book_provider() {
        let book = PriceBook::new();
        book.update(&TickerEvent::new("newusdt", dec!(0.5), Utc::now(), ListingSource::Feed));

        let provider: &dyn PriceProvider = &book;
        assert_eq!(provider.last_price("NEWUSDT"), Some(dec!(0.5)));
        assert_eq!(provider.last_price("OTHERUSDT"), None);
    }

    #[test]
    fn test_static_prices_case_insensitive() {
        let prices = StaticPrices::new();
        prices.set("newusdt", dec!(2));
        assert_eq!(prices.last_price("NEWUSDT"), Some(dec!(2)));
    }
}
