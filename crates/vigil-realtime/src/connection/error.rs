//! Connection error types.

use thiserror::Error;

/// Errors surfaced by the connection manager.
///
/// Only the first `connect()` attempt returns one of these to the caller;
/// afterwards they are absorbed into the reconnect loop and reported through
/// the `on_error` handler and [`ConnectionStatus::last_error`](super::ConnectionStatus).
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The configured base URL could not be turned into a socket URL.
    #[error("invalid WebSocket URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// The socket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Endpoint, without credentials.
        url: String,
        /// Transport message.
        reason: String,
    },
    /// The open socket failed mid-session.
    #[error("connection lost: {reason}")]
    Transport {
        /// Transport message, or the close frame's reason.
        reason: String,
    },
    /// An operation needed an open socket.
    #[error("not connected")]
    NotConnected,
    /// The manager was manually closed while the operation was pending.
    #[error("connection closed")]
    Closed,
}

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_display() {
        let err = ConnectionError::Connect {
            url: "ws://localhost:1/ws".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to ws://localhost:1/ws: connection refused"
        );
    }

    #[test]
    fn transport_error_display() {
        let err = ConnectionError::Transport {
            reason: "reset by peer".into(),
        };
        assert_eq!(err.to_string(), "connection lost: reset by peer");
    }
}
