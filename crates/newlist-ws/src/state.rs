//! Connection state machine.
//!
//! Allowed edges are pure data in `ALLOWED_TRANSITIONS`; anything else is
//! refused by `is_allowed`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};

/// Every valid (from, to) edge.
///
/// `Connecting -> Reconnecting` covers a failed handshake, which is a
/// close/error event before `Connected` is reached.
pub const ALLOWED_TRANSITIONS: &[(ConnectionState, ConnectionState)] = &[
    (Disconnected, Connecting),
    (Connecting, Connected),
    (Connecting, Reconnecting),
    (Connected, Reconnecting),
    (Reconnecting, Connecting),
    (Connecting, Disconnected),
    (Connected, Disconnected),
    (Reconnecting, Disconnected),
];

pub fn is_allowed(from: ConnectionState, to: ConnectionState) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Point-in-time view of the feed client.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub state: ConnectionState,
    /// Scheduled reconnects since the last successful connection.
    pub reconnect_attempts: u32,
    /// Reconnect budget spent; the client stopped scheduling.
    pub exhausted: bool,
    pub last_error: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub frames_received: u64,
    /// Malformed frames and ticker elements dropped.
    pub malformed_dropped: u64,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self {
            state: Disconnected,
            reconnect_attempts: 0,
            exhausted: false,
            last_error: None,
            connected_since: None,
            frames_received: 0,
            malformed_dropped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ConnectionState; 4] = [Disconnected, Connecting, Connected, Reconnecting];

    #[test]
    fn test_documented_edges_allowed() {
        assert!(is_allowed(Disconnected, Connecting));
        assert!(is_allowed(Connecting, Connected));
        assert!(is_allowed(Connected, Reconnecting));
        assert!(is_allowed(Reconnecting, Connecting));
        assert!(is_allowed(Connecting, Reconnecting));
    }

    #[test]
    fn test_every_state_can_shut_down() {
        for from in ALL {
            if from != Disconnected {
                assert!(is_allowed(from, Disconnected), "{from} -> disconnected");
            }
        }
    }

    #[test]
    fn test_illegal_edges_refused() {
        assert!(!is_allowed(Disconnected, Connected));
        assert!(!is_allowed(Disconnected, Reconnecting));
        assert!(!is_allowed(Connected, Connecting));
        assert!(!is_allowed(Reconnecting, Connected));
        for state in ALL {
            assert!(!is_allowed(state, state));
        }
    }
}
