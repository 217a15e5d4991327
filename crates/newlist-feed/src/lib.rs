//! Listing candidate sources for the new-listing bot.
//!
//! - `SymbolUniverse`: baseline capture and candidate classification
//! - `PriceBook`: last price per symbol for order sizing
//! - `TickerPoller`: REST-poll fallback feeding the same handler as the websocket

pub mod error;
pub mod poller;
pub mod price_book;
pub mod universe;

pub use error::{FeedError, FeedResult};
pub use poller::TickerPoller;
pub use price_book::{PriceBook, PricePoint};
pub use universe::{Observation, SymbolUniverse};
