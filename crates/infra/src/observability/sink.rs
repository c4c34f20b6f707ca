//! Production metrics and event sinks
//!
//! Metrics land on whatever recorder the host process installed for the
//! `metrics` facade (none installed means they are dropped). Structured
//! records become `tracing` events with the record's fields flattened into
//! one `fields` value.

use std::fmt::Write;

use metrics::Label;
use tracing::{debug, error, info, warn};
use vigil_common::observability::{EventRecorder, LogRecord, LogSeverity, MetricsCollector};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

fn to_labels(labels: &[(&str, &str)]) -> Vec<Label> {
    labels.iter().map(|(key, value)| Label::new(key.to_string(), value.to_string())).collect()
}

fn format_fields(record: &LogRecord) -> String {
    let mut out = String::new();
    for (key, value) in &record.fields {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{}={}", key, value);
    }
    out
}

impl MetricsCollector for TracingSink {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        metrics::counter!(name.to_string(), to_labels(labels)).increment(1);
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        metrics::gauge!(name.to_string(), to_labels(labels)).set(value);
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        metrics::histogram!(name.to_string(), to_labels(labels)).record(value);
    }
}

impl EventRecorder for TracingSink {
    fn record(&self, record: LogRecord) {
        let fields = format_fields(&record);
        let message = record.message.as_str();
        match record.severity {
            LogSeverity::Debug => debug!(event = %record.event, fields = %fields, "{}", message),
            LogSeverity::Info => info!(event = %record.event, fields = %fields, "{}", message),
            LogSeverity::Warning => warn!(event = %record.event, fields = %fields, "{}", message),
            LogSeverity::Error => error!(event = %record.event, fields = %fields, "{}", message),
            LogSeverity::Critical => error!(event = %record.event, critical = true, fields = %fields, "{}", message),
        }
    }
}
