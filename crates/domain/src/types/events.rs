//! Realtime event types
//!
//! Producers publish `{"type": ..., "data": {...}}` envelopes on the pub/sub
//! channel. The broadcaster turns each one into a [`BufferedMessage`] and
//! sends its [`wire form`](BufferedMessage::to_wire) to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::FALLBACK_EVENT_TYPE;
use crate::errors::{Result, VigilError};

/// Event extracted from a pub/sub message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self { event_type: event_type.into(), data }
    }

    /// Parse a raw pub/sub payload
    ///
    /// The event type is read from the top-level `type`, then `data.type`,
    /// then `data.event_type`, and falls back to `"event"`. A payload without
    /// a `data` object is treated as the data itself.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut object) = value else {
            return Err(VigilError::Validation("event payload must be a JSON object".into()));
        };

        let top_level_type = take_type(&mut object, "type");
        let data = match object.remove("data") {
            Some(data @ Value::Object(_)) => data,
            Some(other) => {
                return Err(VigilError::Validation(format!(
                    "event data must be an object, got {}",
                    json_kind(&other)
                )))
            }
            None => Value::Object(object),
        };

        let event_type = top_level_type
            .or_else(|| data.get("type").and_then(non_empty_str))
            .or_else(|| data.get("event_type").and_then(non_empty_str))
            .unwrap_or_else(|| FALLBACK_EVENT_TYPE.to_string());

        Ok(Self { event_type, data })
    }

    /// Check an outbound payload before it is published
    ///
    /// Requires an object with a non-empty string `type` and an object `data`.
    pub fn validate_outbound(payload: &Value) -> Result<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| VigilError::Validation("event payload must be a JSON object".into()))?;

        let event_type = object
            .get("type")
            .and_then(non_empty_str)
            .ok_or_else(|| VigilError::Validation("event payload requires a non-empty 'type'".into()))?;

        match object.get("data") {
            Some(data @ Value::Object(_)) => Ok(Self { event_type, data: data.clone() }),
            Some(other) => Err(VigilError::Validation(format!(
                "event data must be an object, got {}",
                json_kind(other)
            ))),
            None => Err(VigilError::Validation("event payload requires a 'data' object".into())),
        }
    }

    /// Serialized pub/sub form
    pub fn to_pubsub(&self) -> String {
        json!({ "type": self.event_type, "data": self.data }).to_string()
    }
}

fn take_type(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    object.remove(key).as_ref().and_then(non_empty_str)
}

fn non_empty_str(value: &Value) -> Option<String> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A sequenced event kept in the replay buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub sequence: u64,
    pub event_type: String,
    pub data: Value,
    pub requires_ack: bool,
    pub buffered_at: DateTime<Utc>,
}

impl BufferedMessage {
    pub fn new(sequence: u64, envelope: EventEnvelope, requires_ack: bool) -> Self {
        Self {
            sequence,
            event_type: envelope.event_type,
            data: envelope.data,
            requires_ack,
            buffered_at: Utc::now(),
        }
    }

    /// Client-facing JSON; replayed messages carry `"replay": true`
    pub fn to_wire(&self, replay: bool) -> Value {
        let mut wire = json!({
            "type": self.event_type,
            "seq": self.sequence,
            "data": self.data,
            "requires_ack": self.requires_ack,
        });
        if replay {
            wire["replay"] = Value::Bool(true);
        }
        wire
    }
}

/// Per-connection delivery progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAck {
    pub last_acked_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefers_top_level_type() {
        let envelope =
            EventEnvelope::parse(r#"{"type":"alert.created","data":{"type":"ignored","id":7}}"#)
                .unwrap();
        assert_eq!(envelope.event_type, "alert.created");
        assert_eq!(envelope.data["id"], 7);
    }

    /// Validates the event type lookup order inside `data`.
    ///
    /// Assertions:
    /// - `data.type` is used when there is no top-level type.
    /// - `data.event_type` is used next.
    /// - The fallback type is `"event"`.
    #[test]
    fn test_parse_type_fallbacks() {
        let from_data = EventEnvelope::parse(r#"{"data":{"type":"camera.offline"}}"#).unwrap();
        assert_eq!(from_data.event_type, "camera.offline");

        let from_event_type =
            EventEnvelope::parse(r#"{"data":{"event_type":"incident.opened"}}"#).unwrap();
        assert_eq!(from_event_type.event_type, "incident.opened");

        let fallback = EventEnvelope::parse(r#"{"data":{"id":1}}"#).unwrap();
        assert_eq!(fallback.event_type, "event");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(matches!(EventEnvelope::parse("[1,2]"), Err(VigilError::Validation(_))));
        assert!(matches!(EventEnvelope::parse("not json"), Err(VigilError::Serialization(_))));
        assert!(EventEnvelope::parse(r#"{"data":"text"}"#).is_err());
    }

    #[test]
    fn test_validate_outbound() {
        let ok = EventEnvelope::validate_outbound(&json!({"type":"alert.created","data":{}}));
        assert_eq!(ok.unwrap().event_type, "alert.created");

        assert!(EventEnvelope::validate_outbound(&json!({"data":{}})).is_err());
        assert!(EventEnvelope::validate_outbound(&json!({"type":"  ","data":{}})).is_err());
        assert!(EventEnvelope::validate_outbound(&json!({"type":"x"})).is_err());
        assert!(EventEnvelope::validate_outbound(&json!({"type":"x","data":[1]})).is_err());
        assert!(EventEnvelope::validate_outbound(&json!("x")).is_err());
    }

    #[test]
    fn test_wire_format() {
        let message =
            BufferedMessage::new(42, EventEnvelope::new("alert.created", json!({"id": 1})), true);

        let live = message.to_wire(false);
        assert_eq!(live["type"], "alert.created");
        assert_eq!(live["seq"], 42);
        assert_eq!(live["requires_ack"], true);
        assert!(live.get("replay").is_none());

        assert_eq!(message.to_wire(true)["replay"], true);
    }
}
