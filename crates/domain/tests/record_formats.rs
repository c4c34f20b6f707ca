//! Integration tests for the JSON shapes other processes read: dead-letter
//! records, degradation snapshots and client protocol frames.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use vigil_common::ErrorClassification;
use vigil_domain::{
    BufferedMessage, ClientMessage, DegradationMode, DegradationStatus, EventEnvelope, JobFailure,
    JobPayload, QueuedJob, ServerMessage, ServiceHealth, SystemSnapshot, VigilError,
};

fn failure_for(error: &VigilError) -> JobFailure {
    let now = Utc::now();
    JobFailure {
        id: Uuid::now_v7(),
        original_job: QueuedJob::new("send_webhook", JobPayload::encoded(1, json!({ "url": "https://hooks" }))),
        source_queue: "webhooks".to_string(),
        error: error.to_string(),
        error_kind: error.error_kind().to_string(),
        attempt_count: 3,
        first_failed_at: now,
        last_failed_at: now,
        stack_trace: Some(error.to_string()),
        http_status: error.http_status(),
        response_body: error.response_body().map(str::to_string),
        retry_delays_ms: vec![1000, 2000],
        system_snapshot: SystemSnapshot {
            queue_depths: BTreeMap::from([("webhooks".to_string(), 4)]),
            dlq_breaker_state: "closed".to_string(),
            captured_at: now,
        },
    }
}

/// Validates a dead-letter record keeps every diagnostic field.
///
/// Assertions:
/// - Transport status and body are lifted onto the record.
/// - The payload keeps its `kind` tag and schema version.
/// - Reading the JSON back gives the same record.
#[test]
fn test_dead_letter_record_shape() -> anyhow::Result<()> {
    let error = VigilError::transport("upstream unavailable", Some(503), Some("busy".to_string()));
    let failure = failure_for(&error);

    let value = serde_json::to_value(&failure)?;
    assert_eq!(value["error_kind"], "transport");
    assert_eq!(value["http_status"], 503);
    assert_eq!(value["response_body"], "busy");
    assert_eq!(value["original_job"]["payload"]["kind"], "encoded");
    assert_eq!(value["original_job"]["payload"]["schema_version"], 1);
    assert_eq!(value["system_snapshot"]["queue_depths"]["webhooks"], 4);

    let back: JobFailure = serde_json::from_value(value)?;
    assert_eq!(back, failure);
    assert_eq!(back.retry_delays().len(), 2);
    Ok(())
}

#[test]
fn test_error_serializes_tagged() -> anyhow::Result<()> {
    let error = VigilError::CircuitOpen { name: "dlq_overflow".to_string(), retry_after_ms: 1500 };
    let value = serde_json::to_value(&error)?;
    assert_eq!(value["type"], "CircuitOpen");
    assert_eq!(value["message"]["retry_after_ms"], 1500);
    assert_eq!(serde_json::from_value::<VigilError>(value)?, error);
    Ok(())
}

#[test]
fn test_degradation_status_shape() -> anyhow::Result<()> {
    let status = DegradationStatus {
        mode: DegradationMode::Minimal,
        services: vec![ServiceHealth::new("broker", true)],
        available_features: vec!["alert_viewing".to_string()],
        fallback_depths: BTreeMap::from([("alerts".to_string(), 2)]),
        evaluated_at: Utc::now(),
    };

    let value = serde_json::to_value(&status)?;
    assert_eq!(value["mode"], "minimal");
    assert_eq!(value["services"][0]["status"], "unknown");
    assert_eq!(value["fallback_depths"]["alerts"], 2);
    Ok(())
}

/// Validates a producer payload survives the trip to a client frame.
///
/// Assertions:
/// - The wire message carries type, sequence, data and the ack flag.
/// - Server control messages use snake_case `type` tags.
/// - A client resync frame parses into its request.
#[test]
fn test_event_to_client_frames() -> anyhow::Result<()> {
    let envelope = EventEnvelope::parse(r#"{"type":"incident.opened","data":{"site":"north"}}"#)?;
    let wire = BufferedMessage::new(7, envelope, true).to_wire(false);
    assert_eq!(
        wire,
        json!({ "type": "incident.opened", "seq": 7, "data": { "site": "north" }, "requires_ack": true })
    );

    let ping: Value = serde_json::from_str(&ServerMessage::Ping { last_seq: 7 }.to_json()?)?;
    assert_eq!(ping, json!({ "type": "ping", "lastSeq": 7 }));

    let resync = ClientMessage::parse(r#"{"type":"resync","data":{"channel":"alerts","last_sequence":5}}"#)?;
    assert_eq!(resync, ClientMessage::Resync { channel: Some("alerts".to_string()), last_sequence: 5 });
    Ok(())
}
