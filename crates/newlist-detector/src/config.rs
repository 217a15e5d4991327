//! Detector configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};

/// Configuration for listing deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Keys held by the in-process cache before it is cleared wholesale.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Recent listings loaded into the cache at startup.
    #[serde(default = "default_preload_limit")]
    pub preload_limit: usize,
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_preload_limit() -> usize {
    1_000
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            preload_limit: default_preload_limit(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> DetectorResult<()> {
        if self.cache_capacity == 0 {
            return Err(DetectorError::ConfigError(
                "cache_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
