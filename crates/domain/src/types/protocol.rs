//! Client protocol messages
//!
//! Every frame shares the `{"type": string, "data": object?}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, VigilError};

/// Messages a client may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe { events: Vec<String> },
    /// `None` removes every pattern
    Unsubscribe { events: Option<Vec<String>> },
    Resync { channel: Option<String>, last_sequence: u64 },
    Ack { sequence: u64 },
    Pong,
}

#[derive(Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct EventsData {
    events: Vec<String>,
}

#[derive(Deserialize)]
struct ResyncData {
    #[serde(default)]
    channel: Option<String>,
    last_sequence: u64,
}

#[derive(Deserialize)]
struct AckData {
    sequence: u64,
}

impl ClientMessage {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawClientMessage = serde_json::from_str(text)
            .map_err(|e| VigilError::Validation(format!("malformed client message: {}", e)))?;

        match raw.kind.as_str() {
            "subscribe" => Ok(Self::Subscribe { events: data::<EventsData>(raw.data, "subscribe")?.events }),
            "unsubscribe" => {
                let events = match raw.data {
                    Value::Null => None,
                    Value::Object(ref object) if !object.contains_key("events") => None,
                    other => Some(data::<EventsData>(other, "unsubscribe")?.events),
                };
                Ok(Self::Unsubscribe { events })
            }
            "resync" => {
                let resync = data::<ResyncData>(raw.data, "resync")?;
                Ok(Self::Resync { channel: resync.channel, last_sequence: resync.last_sequence })
            }
            "ack" => Ok(Self::Ack { sequence: data::<AckData>(raw.data, "ack")?.sequence }),
            "pong" => Ok(Self::Pong),
            other => Err(VigilError::Validation(format!("unknown message type '{}'", other))),
        }
    }
}

fn data<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| VigilError::Validation(format!("invalid '{}' data: {}", kind, e)))
}

/// Outcome reported in subscription replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Subscribed,
    Unsubscribed,
}

/// Messages the server sends outside the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscription { action: SubscriptionAction, events: Vec<String> },
    ResyncAck { channel: Option<String>, last_sequence: u64, count: usize },
    Ping {
        #[serde(rename = "lastSeq")]
        last_seq: u64,
    },
    ServiceStatus { status: String, message: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
