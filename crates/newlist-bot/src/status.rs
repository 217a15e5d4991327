//! Service status and dashboard-facing aggregates.

use std::fmt;

use newlist_ws::{ConnectionState, FeedStatus};
use rust_decimal::Decimal;
use serde::Serialize;

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Started and the feed is connected.
    Running,
    /// Started but the feed is connecting, reconnecting or gave up.
    Degraded,
    /// Never started, or stopped explicitly.
    Stopped,
}

impl Health {
    pub fn from_feed(started: bool, state: ConnectionState) -> Self {
        match (started, state) {
            (false, _) => Self::Stopped,
            (true, ConnectionState::Connected) => Self::Running,
            (true, _) => Self::Degraded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by `ListingService::status`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub health: Health,
    pub connection_state: ConnectionState,
    pub reconnect_attempts: u32,
    /// Reconnect budget spent; only a restart resumes the feed.
    pub reconnect_exhausted: bool,
    /// Seconds since `start`, zero while stopped.
    pub uptime_secs: u64,
    /// New listings since process start.
    pub listings_detected: u64,
    pub last_error: Option<String>,
}

impl ServiceStatus {
    pub fn new(started: bool, uptime_secs: u64, listings_detected: u64, feed: FeedStatus) -> Self {
        Self {
            health: Health::from_feed(started, feed.state),
            connection_state: feed.state,
            reconnect_attempts: feed.reconnect_attempts,
            reconnect_exhausted: feed.exhausted,
            uptime_secs,
            listings_detected,
            last_error: feed.last_error,
        }
    }
}

/// Aggregate risk view over the trade audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    /// Open live buy exposure in quote currency.
    pub exposure: Decimal,
    /// Filled share of terminal attempts; `None` before any trade.
    pub win_rate: Option<f64>,
    /// Mean latency of filled live attempts.
    pub avg_latency_ms: Option<f64>,
    pub failed_trades: u64,
    pub rejected_trades: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_mapping() {
        use ConnectionState::*;
        assert_eq!(Health::from_feed(false, Connected), Health::Stopped);
        assert_eq!(Health::from_feed(true, Connected), Health::Running);
        assert_eq!(Health::from_feed(true, Connecting), Health::Degraded);
        assert_eq!(Health::from_feed(true, Reconnecting), Health::Degraded);
        assert_eq!(Health::from_feed(true, Disconnected), Health::Degraded);
    }

    #[test]
    fn test_status_carries_feed_error() {
        let feed = FeedStatus {
            state: ConnectionState::Reconnecting,
            reconnect_attempts: 2,
            last_error: Some("connection refused".to_string()),
            ..FeedStatus::default()
        };
        let status = ServiceStatus::new(true, 12, 3, feed);
        assert_eq!(status.health, Health::Degraded);
        assert_eq!(status.reconnect_attempts, 2);
        assert_eq!(status.last_error.as_deref(), Some("connection refused"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["health"], "degraded");
        assert_eq!(json["connection_state"], "reconnecting");
    }
}
