//! Prometheus metrics for the new-listing bot.
//!
//! Covers:
//! - Feed connection state and reconnects
//! - Listing detection outcomes and dedup cache clears
//! - Risk rejections
//! - Trade outcomes, latency and exchange retries
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};

use crate::error::TelemetryResult;

/// Feed connection state (1 = connected, 0 = not connected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "newlist_ws_connected",
        "Feed connection state (1=connected)"
    )
    .unwrap()
});

/// Feed state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "newlist_ws_state",
        "Feed state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Scheduled reconnects.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "newlist_ws_reconnect_total",
        "Total scheduled feed reconnects",
        &["reason"]
    )
    .unwrap()
});

/// Malformed feed payloads dropped.
pub static FEED_PARSE_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "newlist_feed_parse_errors_total",
        "Total malformed feed payloads dropped"
    )
    .unwrap()
});

/// Listing detection outcomes.
/// Labels: source (feed/poll/injected), outcome (new/duplicate/error)
pub static LISTINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "newlist_listings_total",
        "Listing detection outcomes",
        &["source", "outcome"]
    )
    .unwrap()
});

/// Dedup cache wholesale clears.
pub static DEDUP_CACHE_CLEARS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "newlist_dedup_cache_clears_total",
        "Total dedup cache clears on overflow"
    )
    .unwrap()
});

/// Trade attempts by final status.
/// Labels: mode (dry-run/live), status (filled/rejected/failed)
pub static TRADES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "newlist_trades_total",
        "Trade attempts by mode and final status",
        &["mode", "status"]
    )
    .unwrap()
});

/// Submission-to-acknowledgment latency.
pub static TRADE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "newlist_trade_latency_ms",
        "Exchange submission to acknowledgment latency in milliseconds",
        &["mode"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Risk gate refusals.
/// Labels: reason
pub static RISK_REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "newlist_risk_rejections_total",
        "Total trades refused by the risk gate",
        &["reason"]
    )
    .unwrap()
});

/// Exchange call retries after a transient failure.
pub static EXCHANGE_RETRIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "newlist_exchange_retries_total",
        "Total exchange call retries after transient failures"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record feed connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record feed disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the active state to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in &["disconnected", "connecting", "connected", "reconnecting"] {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn feed_parse_error() {
        FEED_PARSE_ERRORS_TOTAL.inc();
    }

    pub fn listing_outcome(source: &str, outcome: &str) {
        LISTINGS_TOTAL.with_label_values(&[source, outcome]).inc();
    }

    pub fn dedup_cache_cleared() {
        DEDUP_CACHE_CLEARS_TOTAL.inc();
    }

    pub fn trade_recorded(mode: &str, status: &str) {
        TRADES_TOTAL.with_label_values(&[mode, status]).inc();
    }

    pub fn trade_latency(mode: &str, latency_ms: f64) {
        TRADE_LATENCY_MS.with_label_values(&[mode]).observe(latency_ms);
    }

    pub fn risk_rejection(reason: &str) {
        RISK_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn exchange_retry() {
        EXCHANGE_RETRIES_TOTAL.inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
