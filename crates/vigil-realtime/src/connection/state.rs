//! Connection state machine values.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of the single duplex socket.
///
/// ```text
/// Disconnected → Connecting → Connected ─┬─ disconnect() → Closing → Closed
///      ↑                                 └─ abnormal close ─┐
///      └────────────────── reconnect scheduled ←────────────┘
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket; a reconnect may be pending.
    #[default]
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// The socket is open.
    Connected,
    /// A manual disconnect is tearing the socket down.
    Closing,
    /// Manually closed; no reconnect will be scheduled.
    Closed,
}

impl ConnectionState {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of connection bookkeeping, kept by the message store for
/// reactive display.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Most recent transport error, cleared on a successful open.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// When the current socket opened.
    pub connected_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionStatus::default().reconnect_attempts, 0);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_value(ConnectionStatus {
            state: ConnectionState::Connected,
            ..ConnectionStatus::default()
        })
        .unwrap();
        assert_eq!(json["state"], "connected");
        assert!(json.get("reconnectAttempts").is_some());
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
