//! Control channel between the worker and page clients.
//!
//! Messages are JSON objects tagged by a `type` discriminator in
//! SCREAMING_SNAKE_CASE with camelCase fields:
//!
//! ```text
//! page → worker   SKIP_WAITING | BOOKING_SYNCED {offlineId} | GET_PENDING_COUNT | TRIGGER_SYNC
//! worker → page   SYNC_BOOKING {payload, offlineId, idempotencyKey} | PENDING_COUNT {count}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use washbay_store::MutationId;

use crate::{EngineError, EngineResult};

/// A typed control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting worker immediately.
    SkipWaiting,

    /// The page committed a queued mutation; remove it.
    #[serde(rename_all = "camelCase")]
    BookingSynced { offline_id: MutationId },

    /// Ask for the queue length.
    GetPendingCount,

    /// Drain the queue now.
    TriggerSync,

    /// A queued mutation the page should commit to the backend.
    #[serde(rename_all = "camelCase")]
    SyncBooking {
        payload: JsonValue,
        offline_id: MutationId,
        #[serde(default)]
        idempotency_key: String,
    },

    /// Reply to `GET_PENDING_COUNT`.
    PendingCount { count: usize },
}

impl ControlMessage {
    /// Parse an inbound message.
    ///
    /// `BOOKING_SYNCED` is also accepted with its id nested as
    /// `payload.offlineId`.
    pub fn from_json(value: &JsonValue) -> EngineResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| EngineError::InvalidMessage("message is not an object".to_string()))?;

        let is_ack = object.get("type").and_then(JsonValue::as_str) == Some("BOOKING_SYNCED");
        if is_ack && !object.contains_key("offlineId") {
            if let Some(id) = object.get("payload").and_then(|p| p.get("offlineId")) {
                let mut hoisted = object.clone();
                hoisted.insert("offlineId".to_string(), id.clone());
                return Self::decode(JsonValue::Object(hoisted));
            }
        }
        Self::decode(value.clone())
    }

    fn decode(value: JsonValue) -> EngineResult<Self> {
        serde_json::from_value(value).map_err(|e| EngineError::InvalidMessage(e.to_string()))
    }

    /// Encode for posting to a client.
    pub fn to_json(&self) -> JsonValue {
        // Every variant serializes to an object.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::SkipWaiting => "SKIP_WAITING",
            ControlMessage::BookingSynced { .. } => "BOOKING_SYNCED",
            ControlMessage::GetPendingCount => "GET_PENDING_COUNT",
            ControlMessage::TriggerSync => "TRIGGER_SYNC",
            ControlMessage::SyncBooking { .. } => "SYNC_BOOKING",
            ControlMessage::PendingCount { .. } => "PENDING_COUNT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_booking_wire_shape() {
        let msg = ControlMessage::SyncBooking {
            payload: json!({"service": "wash"}),
            offline_id: MutationId(4),
            idempotency_key: "k-4".to_string(),
        };
        assert_eq!(
            msg.to_json(),
            json!({
                "type": "SYNC_BOOKING",
                "payload": {"service": "wash"},
                "offlineId": 4,
                "idempotencyKey": "k-4"
            })
        );
    }

    #[test]
    fn test_parse_inbound() {
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "SKIP_WAITING"})).unwrap(),
            ControlMessage::SkipWaiting
        );
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "BOOKING_SYNCED", "offlineId": 9})).unwrap(),
            ControlMessage::BookingSynced {
                offline_id: MutationId(9)
            }
        );
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "GET_PENDING_COUNT", "extra": true}))
                .unwrap(),
            ControlMessage::GetPendingCount
        );
    }

    #[test]
    fn test_nested_ack_id() {
        let msg =
            ControlMessage::from_json(&json!({"type": "BOOKING_SYNCED", "payload": {"offlineId": 3}}))
                .unwrap();
        assert_eq!(
            msg,
            ControlMessage::BookingSynced {
                offline_id: MutationId(3)
            }
        );
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert!(ControlMessage::from_json(&json!({"type": "REFRESH"})).is_err());
        assert!(ControlMessage::from_json(&json!({"type": "BOOKING_SYNCED"})).is_err());
        assert!(ControlMessage::from_json(&json!("SKIP_WAITING")).is_err());
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let msg = ControlMessage::PendingCount { count: 2 };
        assert_eq!(msg.to_json()["type"], msg.kind());
    }
}
