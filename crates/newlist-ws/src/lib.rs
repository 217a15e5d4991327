//! Exchange ticker feed client.
//!
//! Provides a persistent websocket connection with:
//! - An explicit connection state machine (allowed edges as data)
//! - Automatic reconnection with capped, jittered exponential backoff
//! - Fixed-interval keep-alive pings
//! - Non-blocking forwarding of decoded tickers to a `FeedHandler`

pub mod connection;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod message;
pub mod state;

pub use connection::{backoff_delay, FeedClient, FeedConfig};
pub use error::{WsError, WsResult};
pub use handler::{BoxFuture, FeedHandler};
pub use heartbeat::{HeartbeatManager, HeartbeatStats};
pub use message::{parse_frame, FeedMessage, RawTicker, SubscribeRequest};
pub use state::{is_allowed, ConnectionState, FeedStatus, ALLOWED_TRANSITIONS};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
