//! Trait abstractions for observability components
//!
//! These traits let components emit metrics and structured events without
//! depending on a specific collection system.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::time::SystemTime;

// ============================================================================
// Metrics Collection Traits
// ============================================================================

/// Trait for metrics collection implementations
pub trait MetricsCollector: Send + Sync + Debug {
    /// Record a counter metric
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record a gauge metric
    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record a histogram metric
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record timing metric (in milliseconds)
    fn record_timing(&self, name: &str, duration_ms: u64, labels: &[(&str, &str)]) {
        self.record_histogram(name, duration_ms as f64, labels);
    }
}

// ============================================================================
// Structured Event Traits
// ============================================================================

/// Severity attached to a [`LogRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogSeverity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    /// Data loss or an invariant violation; pages someone
    Critical,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// A structured log record handed to an [`EventRecorder`]
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Stable, dotted event name (e.g. `dlq.write_denied`)
    pub event: String,
    pub severity: LogSeverity,
    pub message: String,
    pub fields: BTreeMap<String, String>,
    pub timestamp: SystemTime,
}

impl LogRecord {
    /// Create a new record stamped with the current time
    pub fn new(
        event: impl Into<String>,
        severity: LogSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            severity,
            message: message.into(),
            fields: BTreeMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Attach a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Sink for structured log records
pub trait EventRecorder: Send + Sync + Debug {
    fn record(&self, record: LogRecord);
}

// ============================================================================
// No-Op Implementations
// ============================================================================

/// No-op metrics collector for testing or when metrics are disabled
#[derive(Debug, Clone, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn record_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// No-op event recorder
#[derive(Debug, Clone, Default)]
pub struct NoOpEventRecorder;

impl EventRecorder for NoOpEventRecorder {
    fn record(&self, _record: LogRecord) {}
}
