//! REST-poll fallback.
//!
//! Polls `GET {base_url}/api/v3/ticker/price` and delivers the snapshot
//! through the same `FeedHandler` as the websocket, tagged `source = poll`.
//! The observation time is the poll time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use newlist_core::{ListingSource, TickerEvent};
use newlist_ws::FeedHandler;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FeedError, FeedResult};

const TICKER_PRICE_PATH: &str = "/api/v3/ticker/price";

#[derive(Debug, Deserialize)]
struct PriceTicker {
    symbol: String,
    price: Decimal,
}

/// Periodic REST ticker snapshot.
pub struct TickerPoller {
    client: reqwest::Client,
    base_url: String,
    interval: Duration,
}

impl TickerPoller {
    pub fn new(base_url: &str, interval_ms: u64, timeout_ms: u64) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            interval: Duration::from_millis(interval_ms.max(1)),
        })
    }

    /// One snapshot of every symbol's last price.
    pub async fn fetch_snapshot(&self) -> FeedResult<Vec<TickerEvent>> {
        let url = format!("{}{}", self.base_url, TICKER_PRICE_PATH);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let tickers: Vec<PriceTicker> = response.json().await?;
        if tickers.is_empty() {
            return Err(FeedError::InvalidData("empty ticker snapshot".to_string()));
        }

        let observed_at = Utc::now();
        Ok(tickers
            .into_iter()
            .map(|t| TickerEvent::new(&t.symbol, t.price, observed_at, ListingSource::Poll))
            .collect())
    }

    /// Poll until `token` is cancelled. Errors are logged and the next tick proceeds.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn FeedHandler>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            url = %self.base_url,
            interval_ms = self.interval.as_millis() as u64,
            "REST poll fallback started"
        );

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("REST poll fallback stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.fetch_snapshot().await {
                        Ok(events) => {
                            debug!(count = events.len(), "Poll snapshot received");
                            handler.on_tickers(events);
                        }
                        Err(e) => warn!(error = %e, "Ticker poll failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newlist_ws::{BoxFuture, WsResult};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct CollectingHandler {
        frames: Mutex<Vec<Vec<TickerEvent>>>,
    }

    impl FeedHandler for CollectingHandler {
        fn prepare(&self) -> BoxFuture<'_, WsResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn on_tickers(&self, events: Vec<TickerEvent>) {
            self.frames.lock().push(events);
        }
    }

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"symbol":"BTCUSDT","price":"37000.00"},{"symbol":"NEWUSDT","price":"0.0021"}]"#)
            .create_async()
            .await;

        let poller = TickerPoller::new(&server.url(), 1_000, 2_000).unwrap();
        let events = poller.fetch_snapshot().await.unwrap();

        mock.assert_async().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].symbol, "NEWUSDT");
        assert_eq!(events[1].price, dec!(0.0021));
        assert_eq!(events[1].source, ListingSource::Poll);
    }

    #[tokio::test]
    async fn test_fetch_snapshot_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let poller = TickerPoller::new(&server.url(), 1_000, 2_000).unwrap();
        match poller.fetch_snapshot().await {
            Err(FeedError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_delivers_until_cancelled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .with_status(200)
            .with_body(r#"[{"symbol":"NEWUSDT","price":"1"}]"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let poller = Arc::new(TickerPoller::new(&server.url(), 20, 2_000).unwrap());
        let handler = Arc::new(CollectingHandler::default());
        let token = CancellationToken::new();
        let task = tokio::spawn(poller.run(handler.clone(), token.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
        task.await.unwrap();

        assert!(!handler.frames.lock().is_empty());
    }
}
