//! Symbol universe.
//!
//! Remembers every symbol ever observed and when it was first seen, and
//! decides which observations are listing candidates. Until armed, every
//! symbol is absorbed as baseline (listed before start). The first-seen
//! timestamp is the listing time for both the feed and the poller, so the
//! two sources always produce the same dedup key.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use newlist_core::listing::normalize_symbol;
use newlist_core::ListingKey;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolState {
    /// Listed before the universe was armed.
    Baseline,
    /// Candidate not yet handed to detection.
    Pending,
    /// Handed to detection, outcome not yet known.
    InFlight,
    /// Detection completed (new or duplicate).
    Confirmed,
}

#[derive(Debug, Clone, Copy)]
struct SymbolEntry {
    first_seen: DateTime<Utc>,
    state: SymbolState,
}

/// Result of observing one ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Absorbed into the baseline; the universe is not armed yet.
    Baseline,
    /// Already listed, already confirmed, or detection in flight.
    Known,
    /// Possible new listing; run detection for this key.
    Candidate(ListingKey),
}

/// Tracks known symbols and arms after the baseline is captured.
#[derive(Default)]
pub struct SymbolUniverse {
    symbols: DashMap<String, SymbolEntry>,
    armed: AtomicBool,
}

impl SymbolUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Stop absorbing baseline; later unseen symbols become candidates.
    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            info!(baseline = self.symbols.len(), "Symbol universe armed");
        }
    }

    /// Record `symbols` as baseline and arm.
    pub fn seed<'a>(&self, symbols: impl IntoIterator<Item = &'a str>, at: DateTime<Utc>) {
        for symbol in symbols {
            self.symbols
                .entry(normalize_symbol(symbol))
                .or_insert(SymbolEntry {
                    first_seen: at,
                    state: SymbolState::Baseline,
                });
        }
        self.arm();
    }

    /// Classify one observation of `symbol` at `ts`.
    pub fn observe(&self, symbol: &str, ts: DateTime<Utc>) -> Observation {
        let symbol = normalize_symbol(symbol);
        let armed = self.is_armed();

        match self.symbols.entry(symbol) {
            Entry::Vacant(slot) => {
                if !armed {
                    slot.insert(SymbolEntry {
                        first_seen: ts,
                        state: SymbolState::Baseline,
                    });
                    return Observation::Baseline;
                }
                let key = ListingKey::new(slot.key(), ts);
                debug!(symbol = %slot.key(), first_seen = %ts, "New symbol observed");
                slot.insert(SymbolEntry {
                    first_seen: ts,
                    state: SymbolState::InFlight,
                });
                Observation::Candidate(key)
            }
            Entry::Occupied(mut slot) => {
                let symbol = slot.key().clone();
                let entry = slot.get_mut();
                match entry.state {
                    SymbolState::Pending => {
                        entry.state = SymbolState::InFlight;
                        Observation::Candidate(ListingKey::new(&symbol, entry.first_seen))
                    }
                    SymbolState::Baseline | SymbolState::InFlight | SymbolState::Confirmed => {
                        Observation::Known
                    }
                }
            }
        }
    }

    /// Detection finished for `symbol` (either outcome).
    pub fn confirm(&self, symbol: &str) {
        if let Some(mut entry) = self.symbols.get_mut(&normalize_symbol(symbol)) {
            entry.state = SymbolState::Confirmed;
        }
    }

    /// Detection failed for `symbol`; the next observation retries it.
    pub fn release(&self, symbol: &str) {
        if let Some(mut entry) = self.symbols.get_mut(&normalize_symbol(symbol)) {
            if entry.state == SymbolState::InFlight {
                entry.state = SymbolState::Pending;
            }
        }
    }

    pub fn first_seen(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.symbols
            .get(&normalize_symbol(symbol))
            .map(|e| e.first_seen)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(offset_ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap() + Duration::milliseconds(offset_ms)
    }

    #[test]
    fn test_unarmed_absorbs_baseline() {
        let universe = SymbolUniverse::new();
        assert_eq!(universe.observe("BTCUSDT", t(0)), Observation::Baseline);
        universe.arm();
        assert_eq!(universe.observe("BTCUSDT", t(10)), Observation::Known);
    }

    #[test]
    fn test_candidate_uses_first_seen_for_every_source() {
        let universe = SymbolUniverse::new();
        universe.seed(["BTCUSDT", "ETHUSDT"], t(0));

        let first = universe.observe("newusdt", t(100));
        assert_eq!(first, Observation::Candidate(ListingKey::new("NEWUSDT", t(100))));
        // In flight: a second source observing it is suppressed.
        assert_eq!(universe.observe("NEWUSDT", t(900)), Observation::Known);

        // Failure releases it; retry keeps the original first-seen time.
        universe.release("NEWUSDT");
        assert_eq!(
            universe.observe("NEWUSDT", t(2_000)),
            Observation::Candidate(ListingKey::new("NEWUSDT", t(100)))
        );

        universe.confirm("NEWUSDT");
        universe.release("NEWUSDT");
        assert_eq!(universe.observe("NEWUSDT", t(3_000)), Observation::Known);
        assert_eq!(universe.first_seen("newusdt"), Some(t(100)));
    }

    #[test]
    fn test_seed_arms() {
        let universe = SymbolUniverse::new();
        assert!(!universe.is_armed());
        universe.seed(["BTCUSDT"], t(0));
        assert!(universe.is_armed());
        assert_eq!(universe.len(), 1);
    }
}
