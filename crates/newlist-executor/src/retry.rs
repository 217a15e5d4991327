//! Exchange call retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for transient exchange failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Exchange calls per logical order, first call included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            factor: 1,
            max_delay_ms: 0,
        }
    }

    /// Whether another call may follow call number `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (0-based) with a given jitter factor.
    pub fn delay(&self, retry: u32, jitter: f64) -> Duration {
        let exponent = retry.min(16) as i32;
        let raw = self.base_delay_ms as f64 * f64::from(self.factor.max(1)).powi(exponent) * jitter;
        Duration::from_millis(raw.min(self.max_delay_ms as f64).max(0.0) as u64)
    }

    /// Delay before retry number `retry`, jittered in [1.0, 1.5).
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        self.delay(retry, jitter_factor())
    }
}

fn jitter_factor() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    1.0 + f64::from(nanos % 500) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0, 1.0), Duration::from_millis(250));
        assert_eq!(policy.delay(1, 1.0), Duration::from_millis(500));
        assert_eq!(policy.delay(2, 1.0), Duration::from_millis(1_000));
        assert_eq!(policy.delay(5, 1.0), Duration::from_millis(2_000));
        assert_eq!(policy.delay(1, 1.25), Duration::from_millis(625));
    }

    #[test]
    fn test_attempt_bound() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let policy = RetryPolicy::default();
        for retry in 0..8 {
            let delay = policy.jittered_delay(retry);
            assert!(delay >= policy.delay(retry, 1.0));
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
        }
    }
}
