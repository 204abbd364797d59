//! Tracker error types.

use thiserror::Error;

/// A failed status fetch, classified by how the poll loop reacts to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server answered with a non-success status. Fatal for the session.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
    /// No response was received. Polling continues.
    #[error("request to {url} failed: {reason}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport message.
        reason: String,
    },
    /// The response body was not JSON. Polling continues.
    #[error("undecodable response from {url}: {reason}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// The tracking URL could not be resolved. Fatal for the session.
    #[error("invalid tracking URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },
}

impl FetchError {
    /// HTTP status code, when the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the tracked session must stop on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::InvalidUrl { .. })
    }
}

/// A poll response body that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// The key set named a known shape but a field did not decode. Polling
    /// continues.
    #[error("malformed {shape} record: {reason}")]
    Malformed {
        /// `job` or `session`.
        shape: &'static str,
        /// Decoder message.
        reason: String,
    },
    /// The body matched neither shape. Fatal for the session.
    #[error("{0}")]
    Unrecognized(String),
}

impl ResponseError {
    /// Whether the tracked session must stop on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unrecognized(_))
    }
}

/// Errors from tracker setup and response interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// A base or tracking URL was unusable.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A poll response matched neither known shape.
    #[error("protocol violation for session {session_id}: {reason}")]
    ProtocolViolation {
        /// The tracked session.
        session_id: String,
        /// What was wrong with the response.
        reason: String,
    },
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_only_for_http_errors() {
        let status = FetchError::Status {
            url: "/s".into(),
            status: 404,
            body: String::new(),
        };
        let transport = FetchError::Transport {
            url: "/s".into(),
            reason: "refused".into(),
        };
        assert_eq!(status.status_code(), Some(404));
        assert_eq!(transport.status_code(), None);
    }

    #[test]
    fn fatal_classification() {
        assert!(
            FetchError::Status { url: "/s".into(), status: 500, body: String::new() }.is_fatal()
        );
        assert!(FetchError::InvalidUrl { url: "::".into(), reason: "bad".into() }.is_fatal());
        assert!(!FetchError::Transport { url: "/s".into(), reason: "timeout".into() }.is_fatal());
        assert!(!FetchError::Decode { url: "/s".into(), reason: "eof".into() }.is_fatal());
    }

    #[test]
    fn only_unrecognized_responses_are_fatal() {
        let malformed = ResponseError::Malformed {
            shape: "session",
            reason: "invalid type: integer `5`, expected a string".into(),
        };
        assert!(!malformed.is_fatal());
        assert!(malformed.to_string().starts_with("malformed session record: "));
        assert!(ResponseError::Unrecognized("keys [id]".into()).is_fatal());
    }

    #[test]
    fn protocol_violation_display() {
        let err = TrackerError::ProtocolViolation {
            session_id: "s1".into(),
            reason: "unknown kind \"batch\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "protocol violation for session s1: unknown kind \"batch\""
        );
    }
}
