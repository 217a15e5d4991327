//! Service orchestration.
//!
//! `ListingService` owns every component:
//! - Ticker feed client and REST poll fallback
//! - Listing pipeline (universe, price book, detector)
//! - Risk-gated order executor
//! - Listing, trade and config stores
//!
//! and exposes the lifecycle (`start`/`stop`/`status`) plus the thin
//! dashboard operations (trade history, risk metrics, config updates).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use newlist_core::{TradeAttempt, TradeConfig, TradeConfigUpdate};
use newlist_detector::{DetectionOutcome, ListingDetector};
use newlist_executor::{
    ApiCredentials, OrderExecutor, OrderGateway, OrderRef, OrderReport, RequestSigner,
    RestOrderGateway,
};
use newlist_feed::{PriceBook, SymbolUniverse, TickerPoller};
use newlist_persistence::{
    ConfigStore, ExposureSource, JournaledTradeStore, ListingStore, MemoryStore, PgStore,
    TradeQuery, TradeStore,
};
use newlist_risk::RiskGate;
use newlist_telemetry::Metrics;
use newlist_ws::FeedClient;
use parking_lot::RwLock;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::{ListingPipeline, PipelineStats};
use crate::status::{RiskMetrics, ServiceStatus};

/// Largest page `trade_history` returns.
pub const MAX_HISTORY_PAGE: usize = 500;

/// Store handles, all possibly backed by one object.
#[derive(Clone)]
pub struct Stores {
    pub listings: Arc<dyn ListingStore>,
    pub trades: Arc<dyn TradeStore>,
    pub exposure: Arc<dyn ExposureSource>,
    pub config: Arc<dyn ConfigStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ListingStore + TradeStore + ExposureSource + ConfigStore + 'static,
    {
        Self {
            listings: backend.clone(),
            trades: backend.clone(),
            exposure: backend.clone(),
            config: backend,
        }
    }

    /// Mirror terminal trade attempts to a daily JSONL journal.
    pub fn with_journal(mut self, journal_dir: &str) -> Self {
        self.trades = Arc::new(JournaledTradeStore::new(self.trades, journal_dir));
        self
    }

    /// Postgres when `database_url` is set, in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let stores = match &config.persistence.database_url {
            Some(url) => {
                let pg = PgStore::connect(url, config.persistence.max_connections).await?;
                Self::from_backend(Arc::new(pg))
            }
            None => {
                warn!("No database_url configured, using in-memory store");
                Self::from_backend(Arc::new(MemoryStore::new()))
            }
        };
        Ok(match &config.persistence.journal_dir {
            Some(dir) => stores.with_journal(dir),
            None => stores,
        })
    }
}

/// Background poll task.
struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// New-listing service.
pub struct ListingService {
    config: AppConfig,
    stores: Stores,
    feed: FeedClient,
    poller: Arc<TickerPoller>,
    pipeline: ListingPipeline,
    executor: Arc<OrderExecutor>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    /// Guards start/stop so they never interleave.
    lifecycle: TokioMutex<Option<PollTask>>,
}

impl ListingService {
    /// Wire every component from `config`.
    ///
    /// `gateway` is required for live orders; dry-run sessions may pass `None`.
    pub fn new(
        config: AppConfig,
        stores: Stores,
        gateway: Option<Arc<dyn OrderGateway>>,
    ) -> AppResult<Self> {
        config.validate()?;

        let universe = Arc::new(SymbolUniverse::new());
        let prices = Arc::new(PriceBook::new());
        let detector = Arc::new(ListingDetector::new(
            stores.listings.clone(),
            config.detector.clone(),
        ));
        let gate = Arc::new(RiskGate::new(
            stores.config.clone(),
            stores.exposure.clone(),
        ));
        let executor = Arc::new(OrderExecutor::new(
            gate,
            stores.trades.clone(),
            gateway,
            prices.clone(),
            config.executor.retry.clone(),
        ));
        let pipeline = ListingPipeline::new(
            universe,
            prices,
            detector,
            executor.clone(),
            config.mode,
            config.executor.listing_quote_qty,
        );
        let poller = Arc::new(TickerPoller::new(
            &config.rest.url,
            config.rest.poll_interval_ms,
            config.rest.timeout_ms,
        )?);
        let feed = FeedClient::new(config.ws.clone(), Arc::new(pipeline.clone()));

        Ok(Self {
            config,
            stores,
            feed,
            poller,
            pipeline,
            executor,
            started_at: RwLock::new(None),
            lifecycle: TokioMutex::new(None),
        })
    }

    /// Build stores and the signed exchange gateway, then wire the service.
    pub async fn from_config(
        config: AppConfig,
        credentials: Option<ApiCredentials>,
    ) -> AppResult<Self> {
        let stores = Stores::from_config(&config).await?;
        let gateway: Option<Arc<dyn OrderGateway>> = match credentials {
            Some(credentials) => {
                let signer = RequestSigner::new(credentials, Some(config.rest.recv_window_ms));
                let gateway = RestOrderGateway::new(
                    &config.rest.url,
                    signer,
                    config.executor.order_timeout_ms,
                )?;
                Some(Arc::new(gateway) as Arc<dyn OrderGateway>)
            }
            None if config.is_live() => {
                return Err(AppError::Config(
                    "live mode requires API credentials".to_string(),
                ))
            }
            None => None,
        };
        Self::new(config, stores, gateway)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start the service. Idempotent.
    ///
    /// Seeds the trade config when the store holds none, captures the
    /// symbol baseline from a REST snapshot when possible, then starts the
    /// feed and (if enabled) the poll fallback. Feed failures never surface
    /// here; they show up in `status()`.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_started() {
            info!("Service already started");
            return;
        }

        match self.stores.config.seed_config(&self.config.trade).await {
            Ok(effective) => info!(
                auto_trade_enabled = effective.auto_trade_enabled,
                max_trade_amount = %effective.max_trade_amount,
                max_position_amount = %effective.max_position_amount,
                "Trade config loaded"
            ),
            Err(e) => warn!(error = %e, "Trade config seed failed, trading stays disabled until the store recovers"),
        }

        if !self.pipeline.is_armed() {
            match self.poller.fetch_snapshot().await {
                Ok(snapshot) => {
                    info!(symbols = snapshot.len(), "Baseline captured from REST snapshot");
                    self.pipeline.seed_baseline(&snapshot);
                }
                Err(e) => warn!(error = %e, "Baseline snapshot failed, first feed frame becomes the baseline"),
            }
        }

        self.feed.initialize().await;

        if self.config.rest.poll_enabled {
            let token = CancellationToken::new();
            let handle = tokio::spawn(self.poller.clone().run(
                Arc::new(self.pipeline.clone()),
                token.clone(),
            ));
            *lifecycle = Some(PollTask { token, handle });
        }

        *self.started_at.write() = Some(Utc::now());
        info!(mode = %self.config.mode, "Service started");
    }

    /// Stop the service. Idempotent.
    ///
    /// Closes the feed, stops polling, then waits up to `drain_timeout_ms`
    /// for detections and in-flight orders. Returns the number of orders
    /// still unresolved.
    pub async fn stop(&self) -> usize {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_started() {
            return 0;
        }

        self.feed.shutdown().await;
        if let Some(poll) = lifecycle.take() {
            poll.token.cancel();
            if let Err(e) = poll.handle.await {
                warn!(?e, "Poll task ended abnormally");
            }
        }

        let timeout = Duration::from_millis(self.config.executor.drain_timeout_ms);
        if !self.pipeline.wait_idle(timeout).await {
            warn!(
                active = self.pipeline.active_tasks(),
                "Detections still running at shutdown"
            );
        }
        let unresolved = self.executor.drain(timeout).await;

        *self.started_at.write() = None;
        info!(unresolved, "Service stopped");
        unresolved
    }

    pub fn is_started(&self) -> bool {
        self.started_at.read().is_some()
    }

    pub fn status(&self) -> ServiceStatus {
        let started_at = *self.started_at.read();
        let uptime_secs = started_at
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0);
        ServiceStatus::new(
            started_at.is_some(),
            uptime_secs,
            self.pipeline.stats().listings_detected,
            self.feed.status(),
        )
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Paginated trade attempts, newest first.
    pub async fn trade_history(&self, query: &TradeQuery) -> AppResult<Vec<TradeAttempt>> {
        let mut query = query.clone();
        query.limit = query.limit.min(MAX_HISTORY_PAGE);
        Ok(self.stores.trades.list_trades(&query).await?)
    }

    pub async fn risk_metrics(&self) -> AppResult<RiskMetrics> {
        let exposure = self.stores.exposure.open_buy_exposure().await?;
        let stats = self.stores.trades.trade_stats().await?;
        Ok(RiskMetrics {
            exposure,
            win_rate: stats.win_rate(),
            avg_latency_ms: stats.avg_live_latency_ms,
            failed_trades: stats.failed,
            rejected_trades: stats.rejected,
        })
    }

    pub async fn current_config(&self) -> AppResult<Option<TradeConfig>> {
        Ok(self.stores.config.load_config().await?)
    }

    /// Validated merge; the stored record is unchanged on error.
    pub async fn update_config(&self, update: &TradeConfigUpdate) -> AppResult<TradeConfig> {
        let updated = self.stores.config.update_config(update).await?;
        info!(
            auto_trade_enabled = updated.auto_trade_enabled,
            max_trade_amount = %updated.max_trade_amount,
            max_position_amount = %updated.max_position_amount,
            high_value_threshold = %updated.high_value_threshold,
            "Trade config updated"
        );
        Ok(updated)
    }

    /// Record an operator-supplied listing and trade it if new.
    pub async fn inject_listing(
        &self,
        symbol: &str,
        listed_at: DateTime<Utc>,
    ) -> AppResult<DetectionOutcome> {
        Ok(self.pipeline.inject(symbol, listed_at).await?)
    }

    pub async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> AppResult<OrderReport> {
        Ok(self.executor.cancel_order(symbol, order).await?)
    }

    /// Prometheus text exposition.
    pub fn metrics(&self) -> AppResult<String> {
        Ok(Metrics::render()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newlist_core::{TradeMode, TradeStatus};
    use newlist_executor::MockOrderGateway;
    use newlist_ws::ConnectionState;
    use rust_decimal_macros::dec;

    use crate::status::Health;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        // Nothing listens here; the feed stays degraded and polls fail fast.
        config.ws.url = "ws://127.0.0.1:1/ws".to_string();
        config.ws.reconnect_base_delay_ms = 50;
        config.ws.reconnect_max_delay_ms = 100;
        config.rest.url = "http://127.0.0.1:1".to_string();
        config.rest.timeout_ms = 200;
        config.rest.poll_interval_ms = 100;
        config.executor.drain_timeout_ms = 500;
        config.trade.auto_trade_enabled = true;
        config
    }

    fn service(config: AppConfig) -> (Arc<MemoryStore>, ListingService) {
        let store = Arc::new(MemoryStore::new());
        let service =
            ListingService::new(config, Stores::from_backend(store.clone()), None).unwrap();
        (store, service)
    }

    #[tokio::test]
    async fn test_status_before_start() {
        let (_, service) = service(offline_config());
        let status = service.status();
        assert_eq!(status.health, Health::Stopped);
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert_eq!(status.uptime_secs, 0);
        assert_eq!(status.listings_detected, 0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (_, service) = service(offline_config());

        service.start().await;
        service.start().await;
        assert!(service.is_started());
        assert_eq!(service.status().health, Health::Degraded);

        assert_eq!(service.stop().await, 0);
        assert_eq!(service.stop().await, 0);
        let status = service.status();
        assert_eq!(status.health, Health::Stopped);
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_seeds_trade_config() {
        let (store, service) = service(offline_config());
        assert!(store.load_config().await.unwrap().is_none());

        service.start().await;
        let seeded = service.current_config().await.unwrap().unwrap();
        assert!(seeded.auto_trade_enabled);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let (_, service) = service(offline_config());
        service.start().await;

        let updated = service
            .update_config(&TradeConfigUpdate {
                max_trade_amount: Some(dec!(20)),
                ..TradeConfigUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.max_trade_amount, dec!(20));

        let err = service
            .update_config(&TradeConfigUpdate {
                max_position_amount: Some(dec!(1)),
                ..TradeConfigUpdate::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        let current = service.current_config().await.unwrap().unwrap();
        assert_eq!(current.max_trade_amount, dec!(20));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_injected_listing_shows_in_history_and_metrics() {
        let (_, service) = service(offline_config());
        service.start().await;

        let outcome = service.inject_listing("NEWUSDT", Utc::now()).await.unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(service.status().listings_detected, 1);

        let trades = service.trade_history(&TradeQuery::default()).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].mode, TradeMode::DryRun);
        assert_eq!(trades[0].status, TradeStatus::Filled);

        let filtered = service
            .trade_history(&TradeQuery {
                status: Some(TradeStatus::Failed),
                ..TradeQuery::default()
            })
            .await
            .unwrap();
        assert!(filtered.is_empty());

        let metrics = service.risk_metrics().await.unwrap();
        assert_eq!(metrics.win_rate, Some(1.0));
        assert_eq!(metrics.failed_trades, 0);
        // Dry-run fills carry no exposure.
        assert_eq!(metrics.exposure, dec!(0));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_without_gateway_fails() {
        let (_, service) = service(offline_config());
        let err = service
            .cancel_order("NEWUSDT", &OrderRef::Exchange("1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Exchange(_)));
    }

    #[tokio::test]
    async fn test_cancel_routes_to_gateway() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockOrderGateway::new());
        let service = ListingService::new(
            offline_config(),
            Stores::from_backend(store),
            Some(gateway.clone()),
        )
        .unwrap();

        let report = service
            .cancel_order("NEWUSDT", &OrderRef::Exchange("77".to_string()))
            .await
            .unwrap();
        assert_eq!(report.status, "CANCELED");
        assert_eq!(gateway.network_calls(), 1);
    }

    #[tokio::test]
    async fn test_journal_mirrors_trades() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_backend(store)
            .with_journal(dir.path().to_str().unwrap());
        let service = ListingService::new(offline_config(), stores, None).unwrap();
        service.start().await;

        service.inject_listing("NEWUSDT", Utc::now()).await.unwrap();
        service.stop().await;

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_live_without_credentials_rejected() {
        let mut config = offline_config();
        config.mode = TradeMode::Live;
        let err = ListingService::from_config(config, None).await.err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
