//! Downstream sink for parsed tickers.

use std::future::Future;
use std::pin::Pin;

use newlist_core::TickerEvent;

use crate::error::WsResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receives every decoded ticker frame.
///
/// Implemented by the detection pipeline; the feed client only knows this
/// trait so it never depends on the detector.
pub trait FeedHandler: Send + Sync + 'static {
    /// Called once by `initialize` before connecting (dedup cache preload).
    /// Errors are logged and ignored.
    fn prepare(&self) -> BoxFuture<'_, WsResult<()>>;

    /// Called on the read path for every ticker frame.
    ///
    /// Must return promptly: slow work (store writes, orders) has to be
    /// spawned, never awaited here.
    fn on_tickers(&self, events: Vec<TickerEvent>);
}
