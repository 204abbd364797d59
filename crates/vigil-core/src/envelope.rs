//! The envelope wire format and its buffered form.
//!
//! Every WebSocket frame in both directions is a UTF-8 JSON object
//! `{ "type": ..., "payload": ..., "timestamp"?: ... }`. The `type` field is
//! the event discriminator; `payload` is type-specific and may carry an entity
//! identifier under one of [`ENTITY_ID_KEYS`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event_types;
use crate::ids::MessageId;

/// Payload keys that identify the entity an event is about, in lookup order.
pub const ENTITY_ID_KEYS: [&str; 3] = ["node_id", "node_uuid", "uuid"];

/// Errors decoding an inbound frame.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid envelope JSON.
    #[error("malformed envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame decoded but carried an empty `type`.
    #[error("envelope has an empty type")]
    MissingType,
}

/// The canonical unit of real-time data exchanged over the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Type-specific data.
    #[serde(default)]
    pub payload: Value,
    /// Server-side timestamp, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Build an envelope without a timestamp.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: None,
        }
    }

    /// Attach a timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// The client heartbeat frame: `{"type":"ping","payload":{}}`.
    pub fn ping() -> Self {
        Self::new(event_types::PING, Value::Object(serde_json::Map::new()))
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_str(text)?;
        if envelope.event_type.is_empty() {
            return Err(EnvelopeError::MissingType);
        }
        Ok(envelope)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The entity this event concerns: the first string value found under
    /// `node_id`, `node_uuid`, then `uuid` in the payload.
    pub fn entity_id(&self) -> Option<&str> {
        ENTITY_ID_KEYS
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
    }

    /// Read a string field from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// An envelope as held by the message store.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Store-assigned unique ID.
    pub id: MessageId,
    /// The received envelope.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// When the store accepted the envelope.
    pub received_at: DateTime<Utc>,
    /// `received_at + ttl`.
    pub expires_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Stamp an envelope received at `now` with the given time-to-live.
    pub fn stamp(envelope: Envelope, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: MessageId::new(),
            envelope,
            received_at: now,
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the message has reached its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Shorthand for the envelope's type.
    pub fn event_type(&self) -> &str {
        &self.envelope.event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn decode_full_frame() {
        let env = Envelope::decode(
            r#"{"type":"scan_progress","payload":{"node_id":"n1","progress":40},"timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(env.event_type, "scan_progress");
        assert_eq!(env.payload["progress"], 40);
        assert_eq!(env.timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn decode_without_payload_defaults_to_null() {
        let env = Envelope::decode(r#"{"type":"pong"}"#).unwrap();
        assert!(env.payload.is_null());
        assert!(env.timestamp.is_none());
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert_matches!(Envelope::decode("{not json"), Err(EnvelopeError::Json(_)));
    }

    #[test]
    fn decode_rejects_empty_type() {
        assert_matches!(
            Envelope::decode(r#"{"type":"","payload":{}}"#),
            Err(EnvelopeError::MissingType)
        );
    }

    #[test]
    fn ping_encodes_with_empty_payload() {
        let text = Envelope::ping().encode().unwrap();
        assert_eq!(text, r#"{"type":"ping","payload":{}}"#);
    }

    #[test]
    fn entity_id_prefers_node_id() {
        let env = Envelope::new("x", json!({"uuid": "u", "node_uuid": "nu", "node_id": "n"}));
        assert_eq!(env.entity_id(), Some("n"));
    }

    #[test]
    fn entity_id_falls_through_missing_and_non_string_keys() {
        let env = Envelope::new("x", json!({"node_id": null, "node_uuid": 5, "uuid": "u"}));
        assert_eq!(env.entity_id(), Some("u"));
        let bare = Envelope::new("x", json!({"progress": 1}));
        assert_eq!(bare.entity_id(), None);
    }

    #[test]
    fn stamped_message_expires_after_ttl() {
        let now = Utc::now();
        let msg = StoredMessage::stamp(Envelope::ping(), now, Duration::minutes(5));
        assert_eq!(msg.expires_at - msg.received_at, Duration::minutes(5));
        assert!(!msg.is_expired(now + Duration::minutes(4)));
        assert!(msg.is_expired(now + Duration::minutes(5)));
    }

    #[test]
    fn stamp_saturates_on_huge_ttl() {
        let msg = StoredMessage::stamp(Envelope::ping(), Utc::now(), Duration::MAX);
        assert_eq!(msg.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!msg.is_expired(Utc::now()));
    }

    #[test]
    fn stored_message_serializes_flat() {
        let msg = StoredMessage::stamp(
            Envelope::new("notification", json!({"title": "hi"})),
            Utc::now(),
            Duration::minutes(5),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notification");
        assert!(value.get("receivedAt").is_some());
        assert!(value.get("expiresAt").is_some());
    }
}
