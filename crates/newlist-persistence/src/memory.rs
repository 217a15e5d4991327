//! In-process store.
//!
//! Enforces the same (symbol, listed_at) uniqueness as the Postgres schema,
//! atomically under one lock, so it is a valid dedup authority for a single
//! process. Used by tests and by dry-run sessions without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use newlist_core::{
    ListingKey, ListingRecord, TradeAttempt, TradeConfig, TradeConfigUpdate, TradeMode,
    TradeStatus,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{
    net_exposure, BoxFuture, ConfigStore, ExposureSource, ListingStore, TradeQuery, TradeStats,
    TradeStore,
};

#[derive(Default)]
struct ListingTable {
    by_key: HashMap<ListingKey, ListingRecord>,
    /// Keys in insertion order.
    order: Vec<ListingKey>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    listings: Mutex<ListingTable>,
    trades: Mutex<Vec<TradeAttempt>>,
    config: RwLock<Option<TradeConfig>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a config record.
    pub fn with_config(config: TradeConfig) -> Self {
        let store = Self::default();
        *store.config.write() = Some(config);
        store
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> PersistenceResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    /// Number of stored rows for a key (0 or 1).
    pub fn listing_rows(&self, key: &ListingKey) -> usize {
        usize::from(self.listings.lock().by_key.contains_key(key))
    }

    /// Snapshot of a trade row by id.
    pub fn trade(&self, id: uuid::Uuid) -> Option<TradeAttempt> {
        self.trades.lock().iter().find(|t| t.id == id).cloned()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.lock().len()
    }
}

impl ListingStore for MemoryStore {
    fn insert_listing<'a>(
        &'a self,
        record: &'a ListingRecord,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            self.check_online()?;
            let key = record.key();
            let mut table = self.listings.lock();
            if table.by_key.contains_key(&key) {
                return Err(PersistenceError::UniqueViolation(
                    "listings_symbol_listed_at_key".to_string(),
                ));
            }
            table.by_key.insert(key.clone(), record.clone());
            table.order.push(key);
            Ok(())
        })
    }

    fn find_listing<'a>(
        &'a self,
        key: &'a ListingKey,
    ) -> BoxFuture<'a, PersistenceResult<Option<ListingRecord>>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self.listings.lock().by_key.get(key).cloned())
        })
    }

    fn recent_listings(&self, limit: usize) -> BoxFuture<'_, PersistenceResult<Vec<ListingRecord>>> {
        Box::pin(async move {
            self.check_online()?;
            let table = self.listings.lock();
            Ok(table
                .order
                .iter()
                .rev()
                .take(limit)
                .filter_map(|key| table.by_key.get(key).cloned())
                .collect())
        })
    }

    fn count_listings(&self) -> BoxFuture<'_, PersistenceResult<u64>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self.listings.lock().by_key.len() as u64)
        })
    }
}

impl TradeStore for MemoryStore {
    fn insert_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            self.check_online()?;
            let mut trades = self.trades.lock();
            if trades.iter().any(|t| t.id == attempt.id) {
                return Err(PersistenceError::UniqueViolation("trades_pkey".to_string()));
            }
            trades.push(attempt.clone());
            Ok(())
        })
    }

    fn finalize_trade<'a>(
        &'a self,
        attempt: &'a TradeAttempt,
    ) -> BoxFuture<'a, PersistenceResult<bool>> {
        Box::pin(async move {
            self.check_online()?;
            let mut trades = self.trades.lock();
            match trades
                .iter_mut()
                .find(|t| t.id == attempt.id && t.status == TradeStatus::Pending)
            {
                Some(row) => {
                    *row = attempt.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn list_trades<'a>(
        &'a self,
        query: &'a TradeQuery,
    ) -> BoxFuture<'a, PersistenceResult<Vec<TradeAttempt>>> {
        Box::pin(async move {
            self.check_online()?;
            let trades = self.trades.lock();
            Ok(trades
                .iter()
                .rev()
                .filter(|t| query.matches(t))
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect())
        })
    }

    fn trade_stats(&self) -> BoxFuture<'_, PersistenceResult<TradeStats>> {
        Box::pin(async move {
            self.check_online()?;
            let trades = self.trades.lock();
            let mut stats = TradeStats::default();
            let mut latency_sum = 0u64;
            let mut latency_count = 0u64;
            for t in trades.iter() {
                match t.status {
                    TradeStatus::Pending => continue,
                    TradeStatus::Filled => {
                        stats.filled += 1;
                        if t.mode == TradeMode::Live {
                            latency_sum += t.latency_ms;
                            latency_count += 1;
                        }
                    }
                    TradeStatus::Rejected => stats.rejected += 1,
                    TradeStatus::Failed => stats.failed += 1,
                }
                stats.terminal += 1;
            }
            if latency_count > 0 {
                stats.avg_live_latency_ms = Some(latency_sum as f64 / latency_count as f64);
            }
            Ok(stats)
        })
    }
}

impl ExposureSource for MemoryStore {
    fn open_buy_exposure(&self) -> BoxFuture<'_, PersistenceResult<Decimal>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(net_exposure(self.trades.lock().iter()))
        })
    }
}

impl ConfigStore for MemoryStore {
    fn load_config(&self) -> BoxFuture<'_, PersistenceResult<Option<TradeConfig>>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self.config.read().clone())
        })
    }

    fn update_config<'a>(
        &'a self,
        update: &'a TradeConfigUpdate,
    ) -> BoxFuture<'a, PersistenceResult<TradeConfig>> {
        Box::pin(async move {
            self.check_online()?;
            let mut guard = self.config.write();
            let current = guard
                .as_ref()
                .ok_or_else(|| PersistenceError::NotFound("trade config".to_string()))?;
            let merged = current.merged(update)?;
            *guard = Some(merged.clone());
            Ok(merged)
        })
    }

    fn seed_config<'a>(
        &'a self,
        initial: &'a TradeConfig,
    ) -> BoxFuture<'a, PersistenceResult<TradeConfig>> {
        Box::pin(async move {
            self.check_online()?;
            initial.validate()?;
            let mut guard = self.config.write();
            if let Some(existing) = guard.as_ref() {
                return Ok(existing.clone());
            }
            let mut seeded = initial.clone();
            seeded.updated_at = Utc::now();
            *guard = Some(seeded.clone());
            Ok(seeded)
        })
    }
}
