//! Job and dead-letter types
//!
//! Payloads are a tagged union so dead-letter records and fallback queues can
//! be stored and read back without dynamic typing. Consumers pick a decoder by
//! `job_type`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/* -------------------------------------------------------------------------- */
/* Jobs */
/* -------------------------------------------------------------------------- */

/// Body of a queued job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// A realtime event waiting to be published
    Broadcast { event: serde_json::Value },
    /// Producer-defined body with an explicit schema version
    Encoded { schema_version: u16, body: serde_json::Value },
}

impl JobPayload {
    pub fn encoded(schema_version: u16, body: serde_json::Value) -> Self {
        Self::Encoded { schema_version, body }
    }
}

/// A unit of work handed to a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: JobPayload,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedJob {
    pub fn new(job_type: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: job_type.into(),
            payload,
            queued_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Age relative to `now`, zero for timestamps in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.queued_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/* -------------------------------------------------------------------------- */
/* Dead-letter records */
/* -------------------------------------------------------------------------- */

/// System state captured when a job is dead-lettered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Depth of every known queue, by name
    pub queue_depths: BTreeMap<String, usize>,
    /// State of the breaker guarding DLQ writes
    pub dlq_breaker_state: String,
    pub captured_at: DateTime<Utc>,
}

/// A job that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub id: Uuid,
    pub original_job: QueuedJob,
    pub source_queue: String,
    pub error: String,
    /// Stable label from `ErrorClassification::error_kind`
    pub error_kind: String,
    pub attempt_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    /// Formatted error source chain, truncated
    pub stack_trace: Option<String>,
    pub http_status: Option<u16>,
    /// Transport response body, truncated
    pub response_body: Option<String>,
    /// Backoff sleeps actually taken, in milliseconds
    pub retry_delays_ms: Vec<u64>,
    pub system_snapshot: SystemSnapshot,
}

impl JobFailure {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }
}

/// Aggregate dead-letter counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqStats {
    pub total: usize,
    pub by_source_queue: BTreeMap<String, usize>,
}

impl DlqStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a JobFailure>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.total += 1;
            *stats.by_source_queue.entry(entry.source_queue.clone()).or_insert(0) += 1;
        }
        stats
    }
}
