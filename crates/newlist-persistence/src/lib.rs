//! Listing and trade storage for the new-listing bot.
//!
//! - `ListingStore`: listings table whose (symbol, listed_at) uniqueness is
//!   the dedup authority
//! - `TradeStore`: append-only trade attempt audit trail with guarded finalize
//! - `ConfigStore`: single-row trading limits
//! - `ExposureSource`: open buy exposure for the risk gate
//!
//! Implementations: `PgStore` (Postgres via sqlx), `MemoryStore`, and the
//! `JournaledTradeStore` decorator that mirrors terminal attempts to JSONL.

pub mod error;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use journal::{JournaledTradeStore, JsonLinesWriter};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    BoxFuture, ConfigStore, ExposureSource, ListingStore, TradeQuery, TradeStats, TradeStore,
};
