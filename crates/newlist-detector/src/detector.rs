//! Listing detector.
//!
//! Two tiers: the bounded in-process cache answers repeat observations
//! without touching the store; everything else is an insert under the
//! store's (symbol, listed_at) uniqueness constraint, which alone decides
//! which of several concurrent callers sees the listing as new.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use newlist_core::{ListingKey, ListingRecord, ListingSource};
use newlist_persistence::{ListingStore, PersistenceError};
use newlist_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::DedupCache;
use crate::config::DetectorConfig;
use crate::error::{DetectorError, DetectorResult};

/// Result of one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionOutcome {
    pub duplicate: bool,
    /// Set for new listings, and for duplicates caught by the store when
    /// the existing row could be read back. Cache hits carry no id.
    pub listing_id: Option<Uuid>,
}

/// Detection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub cache_hits: u64,
    pub inserts: u64,
    pub constraint_hits: u64,
    pub cache_clears: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    inserts: AtomicU64,
    constraint_hits: AtomicU64,
    cache_clears: AtomicU64,
    errors: AtomicU64,
}

/// Exactly-once listing detection.
pub struct ListingDetector {
    store: Arc<dyn ListingStore>,
    cache: DedupCache,
    config: DetectorConfig,
    counters: Counters,
}

impl ListingDetector {
    pub fn new(store: Arc<dyn ListingStore>, config: DetectorConfig) -> Self {
        Self {
            store,
            cache: DedupCache::new(config.cache_capacity),
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Decide whether (symbol, listed_at) is a new listing.
    ///
    /// Store failures other than the uniqueness constraint are returned as
    /// `DetectorError::Persistence` and must not be read as duplicates.
    pub async fn detect_listing(
        &self,
        symbol: &str,
        listed_at: DateTime<Utc>,
        source: ListingSource,
    ) -> DetectorResult<DetectionOutcome> {
        if symbol.trim().is_empty() {
            return Err(DetectorError::InvalidInput("empty symbol".to_string()));
        }
        let key = ListingKey::new(symbol, listed_at);

        if self.cache.contains(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            Metrics::listing_outcome(source.as_str(), "duplicate");
            debug!(%key, %source, "Duplicate listing (cache)");
            return Ok(DetectionOutcome {
                duplicate: true,
                listing_id: None,
            });
        }

        let record = ListingRecord::new(&key, source);
        match self.store.insert_listing(&record).await {
            Ok(()) => {
                self.remember(key.clone());
                self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                Metrics::listing_outcome(source.as_str(), "new");
                info!(
                    symbol = %record.symbol,
                    listed_at = %record.listed_at,
                    %source,
                    listing_id = %record.id,
                    "New listing detected"
                );
                Ok(DetectionOutcome {
                    duplicate: false,
                    listing_id: Some(record.id),
                })
            }
            Err(PersistenceError::UniqueViolation(constraint)) => {
                self.remember(key.clone());
                self.counters.constraint_hits.fetch_add(1, Ordering::Relaxed);
                Metrics::listing_outcome(source.as_str(), "duplicate");
                debug!(%key, %source, %constraint, "Duplicate listing (store)");

                let listing_id = match self.store.find_listing(&key).await {
                    Ok(existing) => existing.map(|r| r.id),
                    Err(e) => {
                        debug!(%key, error = %e, "Existing listing lookup failed");
                        None
                    }
                };
                Ok(DetectionOutcome {
                    duplicate: true,
                    listing_id,
                })
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                Metrics::listing_outcome(source.as_str(), "error");
                warn!(%key, %source, error = %e, "Listing insert failed");
                Err(e.into())
            }
        }
    }

    /// Preload the cache with the `limit` most recent listings.
    ///
    /// Failure only lowers the fast-path hit rate; returns keys loaded.
    pub async fn initialize_cache(&self, limit: usize) -> usize {
        let limit = limit.min(self.cache.capacity());
        match self.store.recent_listings(limit).await {
            Ok(records) => {
                let loaded = records.len();
                for record in records {
                    self.cache.insert(record.key());
                }
                info!(loaded, limit, "Dedup cache preloaded");
                loaded
            }
            Err(e) => {
                warn!(error = %e, "Dedup cache preload failed, continuing with empty cache");
                0
            }
        }
    }

    fn remember(&self, key: ListingKey) {
        if self.cache.insert(key) {
            self.counters.cache_clears.fetch_add(1, Ordering::Relaxed);
            Metrics::dedup_cache_cleared();
            info!(capacity = self.cache.capacity(), "Dedup cache full, cleared");
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            constraint_hits: self.counters.constraint_hits.load(Ordering::Relaxed),
            cache_clears: self.counters.cache_clears.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}
