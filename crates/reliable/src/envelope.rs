use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Wrapper for every event crossing the transport.
///
/// Field names on the wire are `event_id`, `data`, `is_idempotent`,
/// `timestamp` and `status_key`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EventEnvelope {
    /// Unique per producer instance.
    pub event_id: String,

    /// Handler input.
    #[serde(rename = "data", default)]
    pub payload: Value,

    /// Safe to run more than once; no lock is taken.
    #[serde(default)]
    pub is_idempotent: bool,

    /// Seconds since the epoch at publish time.
    #[serde(rename = "timestamp", default)]
    pub created_at: i64,

    /// `{prefix}:{instance_id}:{event_id}`.
    pub status_key: String,
}

impl EventEnvelope {
    /// Builds an envelope with a fresh id.
    #[must_use]
    pub fn new(prefix: &str, instance_id: &str, payload: Value, is_idempotent: bool) -> Self {
        let event_id = Uuid::new_v4().simple().to_string();
        let status_key = format!("{prefix}:{instance_id}:{event_id}");

        Self {
            event_id,
            payload,
            is_idempotent,
            created_at: crate::now_secs(),
            status_key,
        }
    }

    /// Decodes an envelope from a message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a JSON envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encodes the envelope as a message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_status_key_layout() {
        let envelope = EventEnvelope::new("prefix", "instance", json!({}), false);

        assert_eq!(envelope.event_id.len(), 32);
        assert_eq!(
            envelope.status_key,
            format!("prefix:instance:{}", envelope.event_id)
        );
    }

    #[test]
    fn test_wire_field_names() {
        let envelope = EventEnvelope {
            event_id: "abc".to_string(),
            payload: json!({ "name": "fetch_candle" }),
            is_idempotent: true,
            created_at: 1_700_000_000,
            status_key: "p:i:abc".to_string(),
        };

        let wire: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({
                "event_id": "abc",
                "data": { "name": "fetch_candle" },
                "is_idempotent": true,
                "timestamp": 1_700_000_000,
                "status_key": "p:i:abc",
            })
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let envelope =
            EventEnvelope::from_slice(br#"{"event_id":"abc","status_key":"p:i:abc"}"#).unwrap();

        assert!(!envelope.is_idempotent);
        assert_eq!(envelope.payload, Value::Null);
        assert_eq!(envelope.created_at, 0);
    }

    #[test]
    fn test_missing_status_key_is_rejected() {
        assert!(EventEnvelope::from_slice(br#"{"event_id":"abc"}"#).is_err());
        assert!(EventEnvelope::from_slice(b"<html>").is_err());
    }
}
