//! Listing pipeline: ticker frames → candidates → detection → execution.
//!
//! The feed client and the REST poller both deliver into the same
//! `ListingPipeline`. The receive path only updates in-memory state and
//! classifies symbols; every detection (and the trade it may trigger) runs
//! on its own spawned task so a slow store write never holds up the next
//! frame.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use newlist_core::listing::normalize_symbol;
use newlist_core::{ListingKey, ListingSource, TickerEvent, TradeMode, TradeStatus};
use newlist_detector::{DetectionOutcome, DetectorResult, ListingDetector};
use newlist_executor::{OrderExecutor, TradeRequest};
use newlist_feed::{Observation, PriceBook, SymbolUniverse};
use newlist_ws::{BoxFuture, FeedHandler, WsResult};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Listings that won the dedup race (duplicate = false).
    pub listings_detected: u64,
    /// Detections that failed on the store and were released for retry.
    pub detection_errors: u64,
    /// Trades handed to the executor.
    pub trades_submitted: u64,
}

struct Shared {
    universe: Arc<SymbolUniverse>,
    prices: Arc<PriceBook>,
    detector: Arc<ListingDetector>,
    executor: Arc<OrderExecutor>,
    mode: TradeMode,
    listing_quote_qty: Decimal,
    listings_detected: AtomicU64,
    detection_errors: AtomicU64,
    trades_submitted: AtomicU64,
    active: AtomicUsize,
    idle: Notify,
}

/// Decrements the active task count when a detection task ends.
struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.idle.notify_waiters();
    }
}

/// `FeedHandler` that turns unseen symbols into listings and trades.
#[derive(Clone)]
pub struct ListingPipeline {
    shared: Arc<Shared>,
}

impl ListingPipeline {
    pub fn new(
        universe: Arc<SymbolUniverse>,
        prices: Arc<PriceBook>,
        detector: Arc<ListingDetector>,
        executor: Arc<OrderExecutor>,
        mode: TradeMode,
        listing_quote_qty: Decimal,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                universe,
                prices,
                detector,
                executor,
                mode,
                listing_quote_qty,
                listings_detected: AtomicU64::new(0),
                detection_errors: AtomicU64::new(0),
                trades_submitted: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Absorb a full snapshot as the baseline and arm the universe.
    pub fn seed_baseline(&self, events: &[TickerEvent]) {
        for event in events {
            self.shared.prices.update(event);
        }
        self.shared
            .universe
            .seed(events.iter().map(|e| e.symbol.as_str()), Utc::now());
    }

    pub fn is_armed(&self) -> bool {
        self.shared.universe.is_armed()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            listings_detected: self.shared.listings_detected.load(Ordering::Relaxed),
            detection_errors: self.shared.detection_errors.load(Ordering::Relaxed),
            trades_submitted: self.shared.trades_submitted.load(Ordering::Relaxed),
        }
    }

    /// Detection tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Wait until no detection task is running. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.shared.idle.notified();
            if self.active_tasks() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.active_tasks() == 0;
            }
        }
    }

    /// Run detection (and the trade on a new listing) for an operator-supplied listing.
    pub async fn inject(
        &self,
        symbol: &str,
        listed_at: DateTime<Utc>,
    ) -> DetectorResult<DetectionOutcome> {
        let outcome = self
            .shared
            .detector
            .detect_listing(symbol, listed_at, ListingSource::Injected)
            .await?;
        self.shared.universe.confirm(symbol);
        if !outcome.duplicate {
            self.shared.listings_detected.fetch_add(1, Ordering::Relaxed);
            execute_listing_trade(&self.shared, &normalize_symbol(symbol)).await;
        }
        Ok(outcome)
    }

    fn spawn_detection(&self, key: ListingKey, source: ListingSource) {
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.shared.clone());
        tokio::spawn(async move {
            let shared = guard.0.clone();
            handle_candidate(&shared, key, source).await;
            drop(guard);
        });
    }
}

async fn handle_candidate(shared: &Shared, key: ListingKey, source: ListingSource) {
    let symbol = key.symbol().to_string();
    let outcome = match shared
        .detector
        .detect_listing(&symbol, key.listed_at(), source)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            shared.detection_errors.fetch_add(1, Ordering::Relaxed);
            shared.universe.release(&symbol);
            warn!(%key, %source, error = %e, "Listing detection failed, will retry on next ticker");
            return;
        }
    };
    shared.universe.confirm(&symbol);

    if outcome.duplicate {
        debug!(%key, %source, "Listing already recorded");
        return;
    }
    shared.listings_detected.fetch_add(1, Ordering::Relaxed);
    execute_listing_trade(shared, &symbol).await;
}

async fn execute_listing_trade(shared: &Shared, symbol: &str) {
    let request = TradeRequest::new(symbol, shared.listing_quote_qty, shared.mode);
    shared.trades_submitted.fetch_add(1, Ordering::Relaxed);
    match shared.executor.execute_trade(&request).await {
        Ok(attempt) if attempt.status == TradeStatus::Filled => info!(
            symbol = %attempt.symbol,
            trade_id = %attempt.id,
            mode = %attempt.mode,
            quote_qty = %attempt.quote_qty,
            latency_ms = attempt.latency_ms,
            "Listing trade filled"
        ),
        Ok(attempt) => warn!(
            symbol = %attempt.symbol,
            trade_id = %attempt.id,
            status = %attempt.status,
            reason = attempt.error_reason.as_deref().unwrap_or(""),
            "Listing trade not filled"
        ),
        Err(e) => error!(symbol, error = %e, "Listing trade could not be recorded"),
    }
}

impl FeedHandler for ListingPipeline {
    fn prepare(&self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move {
            let limit = self.shared.detector.config().preload_limit;
            let loaded = self.shared.detector.initialize_cache(limit).await;
            debug!(loaded, "Dedup cache preloaded");
            Ok(())
        })
    }

    fn on_tickers(&self, events: Vec<TickerEvent>) {
        for event in &events {
            self.shared.prices.update(event);
            match self.shared.universe.observe(&event.symbol, event.timestamp) {
                Observation::Candidate(key) => self.spawn_detection(key, event.source),
                Observation::Baseline | Observation::Known => {}
            }
        }
        // First frame is the baseline when no REST snapshot armed us earlier.
        if !self.shared.universe.is_armed() && !events.is_empty() {
            self.shared.universe.arm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use newlist_core::TradeConfig;
    use newlist_detector::DetectorConfig;
    use newlist_executor::RetryPolicy;
    use newlist_persistence::{MemoryStore, TradeQuery, TradeStore};
    use newlist_risk::RiskGate;
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MemoryStore>,
        pipeline: ListingPipeline,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::with_config(TradeConfig {
            max_trade_amount: dec!(100),
            max_position_amount: dec!(1000),
            auto_trade_enabled: true,
            high_value_threshold: dec!(500),
            updated_at: Utc::now(),
        }));
        let prices = Arc::new(PriceBook::new());
        let detector = Arc::new(ListingDetector::new(store.clone(), DetectorConfig::default()));
        let gate = Arc::new(RiskGate::new(store.clone(), store.clone()));
        let executor = Arc::new(OrderExecutor::new(
            gate,
            store.clone(),
            None,
            prices.clone(),
            RetryPolicy::immediate(1),
        ));
        let pipeline = ListingPipeline::new(
            Arc::new(SymbolUniverse::new()),
            prices,
            detector,
            executor,
            TradeMode::DryRun,
            dec!(50),
        );
        Harness { store, pipeline }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn feed(symbol: &str, price: Decimal, secs: i64) -> TickerEvent {
        TickerEvent::new(symbol, price, ts(secs), ListingSource::Feed)
    }

    fn poll(symbol: &str, price: Decimal, secs: i64) -> TickerEvent {
        TickerEvent::new(symbol, price, ts(secs), ListingSource::Poll)
    }

    async fn settle(pipeline: &ListingPipeline) {
        assert!(pipeline.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_first_frame_is_baseline() {
        let h = harness();
        h.pipeline
            .on_tickers(vec![feed("BTCUSDT", dec!(60000), 0), feed("ETHUSDT", dec!(3000), 0)]);
        settle(&h.pipeline).await;

        assert!(h.pipeline.is_armed());
        assert_eq!(h.pipeline.stats().listings_detected, 0);
        assert_eq!(h.store.trade_count(), 0);
    }

    #[tokio::test]
    async fn test_new_symbol_triggers_dry_run_trade() {
        let h = harness();
        h.pipeline.on_tickers(vec![feed("BTCUSDT", dec!(60000), 0)]);
        h.pipeline
            .on_tickers(vec![feed("BTCUSDT", dec!(60010), 1), feed("NEWUSDT", dec!(2), 1)]);
        settle(&h.pipeline).await;

        let stats = h.pipeline.stats();
        assert_eq!(stats.listings_detected, 1);
        assert_eq!(stats.trades_submitted, 1);

        let trades = h.store.list_trades(&TradeQuery::default()).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "NEWUSDT");
        assert_eq!(trades[0].mode, TradeMode::DryRun);
        assert_eq!(trades[0].status, TradeStatus::Filled);
        assert_eq!(trades[0].quote_qty, dec!(50));
    }

    #[tokio::test]
    async fn test_feed_and_poll_trade_once() {
        let h = harness();
        h.pipeline.seed_baseline(&[poll("BTCUSDT", dec!(60000), 0)]);

        h.pipeline.on_tickers(vec![feed("NEWUSDT", dec!(2), 5)]);
        h.pipeline.on_tickers(vec![poll("NEWUSDT", dec!(2), 6)]);
        h.pipeline.on_tickers(vec![feed("NEWUSDT", dec!(2.1), 7)]);
        settle(&h.pipeline).await;

        assert_eq!(h.pipeline.stats().listings_detected, 1);
        assert_eq!(h.store.trade_count(), 1);
        let key = ListingKey::new("NEWUSDT", ts(5));
        assert_eq!(h.store.listing_rows(&key), 1);
    }

    #[tokio::test]
    async fn test_seeded_symbols_are_not_listings() {
        let h = harness();
        h.pipeline
            .seed_baseline(&[poll("BTCUSDT", dec!(60000), 0), poll("ETHUSDT", dec!(3000), 0)]);
        assert!(h.pipeline.is_armed());

        h.pipeline.on_tickers(vec![feed("ETHUSDT", dec!(3001), 1)]);
        settle(&h.pipeline).await;
        assert_eq!(h.pipeline.stats().listings_detected, 0);
    }

    #[tokio::test]
    async fn test_store_outage_releases_for_retry() {
        let h = harness();
        h.pipeline.seed_baseline(&[poll("BTCUSDT", dec!(60000), 0)]);

        h.store.set_offline(true);
        h.pipeline.on_tickers(vec![feed("NEWUSDT", dec!(2), 5)]);
        settle(&h.pipeline).await;
        assert_eq!(h.pipeline.stats().detection_errors, 1);
        assert_eq!(h.pipeline.stats().listings_detected, 0);

        h.store.set_offline(false);
        h.pipeline.on_tickers(vec![feed("NEWUSDT", dec!(2), 9)]);
        settle(&h.pipeline).await;

        assert_eq!(h.pipeline.stats().listings_detected, 1);
        // Retry keeps the first-seen time as the listing time.
        assert_eq!(h.store.listing_rows(&ListingKey::new("NEWUSDT", ts(5))), 1);
    }

    #[tokio::test]
    async fn test_injected_listing_trades_once() {
        let h = harness();
        h.pipeline.seed_baseline(&[poll("BTCUSDT", dec!(60000), 0)]);

        let first = h.pipeline.inject("newusdt", ts(30)).await.unwrap();
        assert!(!first.duplicate);
        let again = h.pipeline.inject("NEWUSDT", ts(30)).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(again.listing_id, first.listing_id);

        assert_eq!(h.pipeline.stats().listings_detected, 1);
        assert_eq!(h.store.trade_count(), 1);
    }

    #[tokio::test]
    async fn test_prices_recorded_for_every_ticker() {
        let h = harness();
        h.pipeline
            .on_tickers(vec![feed("BTCUSDT", dec!(60000), 0), feed("ETHUSDT", dec!(3000), 0)]);
        assert_eq!(h.pipeline.shared.prices.price("ETHUSDT"), Some(dec!(3000)));
    }

    #[tokio::test]
    async fn test_prepare_preloads_cache() {
        let h = harness();
        h.pipeline.prepare().await.unwrap();
        assert_eq!(h.pipeline.shared.detector.cache_len(), 0);
    }
}
