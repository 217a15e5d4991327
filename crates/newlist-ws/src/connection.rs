//! Feed connection lifecycle.
//!
//! `FeedClient` owns one persistent websocket connection: it subscribes on
//! connect, forwards decoded tickers to a `FeedHandler`, keeps the link
//! alive with pings and reconnects with exponential backoff. Connection
//! errors never escape `initialize`/`shutdown`; they surface via `status()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use newlist_telemetry::Metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{WsError, WsResult};
use crate::handler::FeedHandler;
use crate::heartbeat::{HeartbeatManager, HeartbeatStats};
use crate::message::{parse_frame, FeedMessage, SubscribeRequest};
use crate::state::{is_allowed, ConnectionState, FeedStatus};

/// Feed client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Streams named in the subscribe message.
    #[serde(default = "default_streams")]
    pub streams: Vec<String>,
    /// Consecutive failed reconnects before giving up (0 = infinite).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// A pong later than this is logged, not acted on.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// How long `shutdown` waits for the connection task before aborting it.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_streams() -> Vec<String> {
    vec!["!ticker@arr".to_string()]
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            streams: default_streams(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// State shared between the client handle and its connection task.
struct Shared {
    status: RwLock<FeedStatus>,
    heartbeat: HeartbeatManager,
    next_request_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    /// Apply a transition if the table allows it. Illegal edges are refused.
    fn transition(&self, to: ConnectionState) -> bool {
        let mut status = self.status.write();
        let from = status.state;
        if !is_allowed(from, to) {
            warn!(%from, %to, "Illegal connection state transition refused");
            return false;
        }
        status.state = to;
        drop(status);

        debug!(%from, %to, "Connection state changed");
        Metrics::ws_state_set(to.as_str());
        true
    }

    fn on_connected(&self) {
        if self.transition(ConnectionState::Connected) {
            let mut status = self.status.write();
            status.reconnect_attempts = 0;
            status.exhausted = false;
            status.connected_since = Some(Utc::now());
            drop(status);
            Metrics::ws_connected();
            info!("Feed connected");
        }
    }

    fn on_connection_lost(&self, err: &WsError) {
        {
            let mut status = self.status.write();
            status.last_error = Some(err.to_string());
            status.connected_since = None;
        }
        Metrics::ws_disconnected();
        self.transition(ConnectionState::Reconnecting);
    }
}

struct RunHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Streaming ticker feed client.
pub struct FeedClient {
    config: Arc<FeedConfig>,
    handler: Arc<dyn FeedHandler>,
    shared: Arc<Shared>,
    /// Connection task; guarded so initialize/shutdown never interleave.
    run: TokioMutex<Option<RunHandle>>,
}

impl FeedClient {
    pub fn new(config: FeedConfig, handler: Arc<dyn FeedHandler>) -> Self {
        let heartbeat = HeartbeatManager::new(config.ping_interval_ms, config.pong_timeout_ms);
        Self {
            config: Arc::new(config),
            handler,
            shared: Arc::new(Shared {
                status: RwLock::new(FeedStatus::default()),
                heartbeat,
                next_request_id: AtomicU64::new(1),
            }),
            run: TokioMutex::new(None),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Start the feed. Idempotent.
    ///
    /// No-op while a connection task is alive (connecting, connected or
    /// waiting to reconnect). Otherwise runs the handler's preload (failure
    /// is logged and ignored) and starts connecting in the background.
    pub async fn initialize(&self) {
        let mut run = self.run.lock().await;

        if let Some(active) = run.as_ref() {
            if !active.handle.is_finished() {
                debug!(state = %self.state(), "Feed already running, initialize is a no-op");
                return;
            }
        }
        // A finished task means the reconnect budget was spent; start over.
        if let Some(stale) = run.take() {
            if let Err(e) = stale.handle.await {
                warn!(?e, "Previous feed task ended abnormally");
            }
        }

        if let Err(e) = self.handler.prepare().await {
            warn!(error = %e, "Feed handler preload failed, continuing without it");
        }

        {
            let mut status = self.shared.status.write();
            status.reconnect_attempts = 0;
            status.exhausted = false;
        }
        self.shared.transition(ConnectionState::Connecting);

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_feed(
            self.config.clone(),
            self.handler.clone(),
            self.shared.clone(),
            token.clone(),
        ));
        *run = Some(RunHandle { token, handle });
        info!(url = %self.config.url, "Feed client initialized");
    }

    /// Stop the feed. Idempotent and safe from any state.
    ///
    /// Cancels the connection task (and with it the ping timer and any
    /// pending reconnect delay), closes the socket if open and resets the
    /// attempt counter. Final state is `disconnected`.
    pub async fn shutdown(&self) {
        let mut run = self.run.lock().await;

        if let Some(active) = run.take() {
            active.token.cancel();
            let mut handle = active.handle;
            let wait = Duration::from_millis(self.config.shutdown_timeout_ms);
            match tokio::time::timeout(wait, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(?e, "Feed task ended abnormally"),
                Err(_) => {
                    warn!("Feed task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if self.state() != ConnectionState::Disconnected {
            self.shared.transition(ConnectionState::Disconnected);
            info!("Feed client shut down");
        }
        let mut status = self.shared.status.write();
        status.reconnect_attempts = 0;
        status.exhausted = false;
        status.connected_since = None;
        drop(status);
        Metrics::ws_disconnected();
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.status.read().clone()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.shared.heartbeat.stats()
    }
}

/// Reconnect delay: `min(base * 2^attempt * jitter_factor, max)`.
///
/// With `jitter_factor` in [1.0, 1.5) the sequence over consecutive
/// attempts is non-decreasing, since each base step doubles.
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32, jitter_factor: f64) -> Duration {
    let exponent = attempt.min(30) as i32;
    let raw = base_ms as f64 * 2f64.powi(exponent) * jitter_factor;
    let capped = raw.min(max_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// Jitter factor in [1.0, 1.5).
pub(crate) fn jitter_factor() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    1.0 + f64::from(nanos % 500) / 1000.0
}

fn reconnect_reason(err: &WsError) -> &'static str {
    match err {
        WsError::ConnectionClosed { .. } => "closed",
        WsError::Tungstenite(_) | WsError::ConnectionFailed(_) => "error",
        _ => "other",
    }
}

/// Connection task: connect, run, back off, repeat until cancelled or
/// the reconnect budget is spent.
async fn run_feed(
    config: Arc<FeedConfig>,
    handler: Arc<dyn FeedHandler>,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    loop {
        let err = match connect_once(&config, handler.as_ref(), &shared, &token).await {
            Ok(()) => return,
            Err(e) => e,
        };
        if token.is_cancelled() {
            return;
        }

        error!(error = %err, "Feed connection lost");
        shared.on_connection_lost(&err);

        let attempt = shared.status.read().reconnect_attempts;
        if config.max_reconnect_attempts > 0 && attempt >= config.max_reconnect_attempts {
            error!(attempt, "Reconnect attempts exhausted, feed degraded");
            shared.status.write().exhausted = true;
            return;
        }

        let delay = backoff_delay(
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
            attempt,
            jitter_factor(),
        );
        shared.status.write().reconnect_attempts = attempt + 1;
        Metrics::ws_reconnect(reconnect_reason(&err));
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = token.cancelled() => {
                info!("Shutdown requested during backoff");
                return;
            }
        }

        shared.transition(ConnectionState::Connecting);
    }
}

/// One connection. Returns `Ok(())` only when cancelled.
async fn connect_once(
    config: &FeedConfig,
    handler: &dyn FeedHandler,
    shared: &Shared,
    token: &CancellationToken,
) -> WsResult<()> {
    info!(url = %config.url, "Connecting to feed");

    let connect = connect_async_tls_with_config(config.url.as_str(), None, true, None);
    let (ws_stream, _response) = tokio::select! {
        result = connect => result?,
        () = token.cancelled() => return Ok(()),
    };
    let (mut write, mut read) = ws_stream.split();

    shared.on_connected();
    shared.heartbeat.reset();

    let request_id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
    let subscribe = SubscribeRequest::new(&config.streams, request_id);
    write
        .send(Message::Text(serde_json::to_string(&subscribe)?))
        .await?;
    info!(streams = ?config.streams, id = request_id, "Subscribe sent");

    let period = shared.heartbeat.interval();
    let mut ping_timer = tokio::time::interval_at(Instant::now() + period, period);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!("Shutdown signal received in message loop");
                if let Err(e) = write.send(Message::Close(None)).await {
                    warn!(?e, "Failed to send Close frame during shutdown");
                }
                return Ok(());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&text, handler, shared);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        shared.heartbeat.record_pong();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(code, %reason, "Feed closed by server");
                        return Err(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Err(e)) => {
                        return Err(e.into());
                    }
                    None => {
                        return Err(WsError::ConnectionClosed {
                            code: 1006,
                            reason: "Stream ended".to_string(),
                        });
                    }
                    _ => {}
                }
            }

            _ = ping_timer.tick() => {
                if shared.heartbeat.pong_overdue() {
                    warn!("Pong overdue");
                }
                match write.send(Message::Ping(Vec::new())).await {
                    Ok(()) => shared.heartbeat.record_ping(),
                    Err(e) => debug!(?e, "Ping send failed, ignored"),
                }
            }
        }
    }
}

/// Decode a text frame and hand tickers to the handler without awaiting it.
fn handle_text(text: &str, handler: &dyn FeedHandler, shared: &Shared) {
    shared.heartbeat.record_message();
    shared.status.write().frames_received += 1;

    match parse_frame(text) {
        Ok(FeedMessage::Tickers { events, malformed }) => {
            if malformed > 0 {
                warn!(malformed, "Dropped malformed tickers from frame");
                shared.status.write().malformed_dropped += malformed as u64;
                for _ in 0..malformed {
                    Metrics::feed_parse_error();
                }
            }
            if !events.is_empty() {
                handler.on_tickers(events);
            }
        }
        Ok(FeedMessage::Ack { id }) => debug!(id, "Subscription acknowledged"),
        Ok(FeedMessage::Ignored) => {}
        Err(e) => {
            warn!(error = %e, len = text.len(), "Dropping malformed feed message");
            shared.status.write().malformed_dropped += 1;
            Metrics::feed_parse_error();
        }
    }
}
