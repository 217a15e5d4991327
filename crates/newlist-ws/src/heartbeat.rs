//! Keep-alive tracking for the feed connection.
//!
//! Records ping/pong timing and message activity. A missing pong is only
//! reported; the connection is torn down solely on a close or read error.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct HeartbeatTimes {
    last_ping: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
    last_message: Option<DateTime<Utc>>,
    waiting_for_pong: bool,
}

/// Heartbeat manager for the feed connection.
pub struct HeartbeatManager {
    interval: Duration,
    pong_timeout_ms: i64,
    times: RwLock<HeartbeatTimes>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, pong_timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            pong_timeout_ms: pong_timeout_ms as i64,
            times: RwLock::new(HeartbeatTimes::default()),
        }
    }

    /// Ping period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reset state (called on connection).
    pub fn reset(&self) {
        *self.times.write() = HeartbeatTimes {
            last_message: Some(Utc::now()),
            ..HeartbeatTimes::default()
        };
    }

    pub fn record_ping(&self) {
        let mut times = self.times.write();
        times.last_ping = Some(Utc::now());
        times.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let now = Utc::now();
        let mut times = self.times.write();
        times.last_pong = Some(now);
        times.waiting_for_pong = false;

        if let Some(ping_time) = times.last_ping {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
    }

    pub fn record_message(&self) {
        self.times.write().last_message = Some(Utc::now());
    }

    /// True while a ping is outstanding for longer than the pong timeout.
    pub fn pong_overdue(&self) -> bool {
        let times = self.times.read();
        match (times.waiting_for_pong, times.last_ping) {
            (true, Some(ping_time)) => {
                (Utc::now() - ping_time).num_milliseconds() > self.pong_timeout_ms
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> HeartbeatStats {
        let times = *self.times.read();
        HeartbeatStats {
            last_ping: times.last_ping,
            last_pong: times.last_pong,
            last_message: times.last_message,
            waiting_for_pong: times.waiting_for_pong,
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
    pub waiting_for_pong: bool,
}
