//! Recording implementations of the observability traits
//!
//! Both doubles keep everything they receive so tests can assert on emitted
//! metrics and log records.

#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::observability::{EventRecorder, LogRecord, LogSeverity, MetricsCollector};

/// A metric sample captured by [`RecordingMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

/// Metrics collector that remembers every call
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    samples: Arc<Mutex<Vec<MetricSample>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total increments of counter `name` across all label sets
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Last gauge or histogram value recorded under `name`
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.samples.lock().iter().rev().find(|s| s.name == name).map(|s| s.value)
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    fn push(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.samples.lock().push(MetricSample {
            name: name.to_string(),
            value,
            labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        });
    }
}

impl MetricsCollector for RecordingMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += 1;
        self.push(name, 1.0, labels);
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push(name, value, labels);
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push(name, value, labels);
    }
}

/// Event recorder that keeps every record
#[derive(Debug, Clone, Default)]
pub struct RecordingEventRecorder {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records whose event name equals `event`
    pub fn by_event(&self, event: &str) -> Vec<LogRecord> {
        self.records.lock().iter().filter(|r| r.event == event).cloned().collect()
    }

    pub fn count_at_least(&self, severity: LogSeverity) -> usize {
        self.records.lock().iter().filter(|r| r.severity >= severity).count()
    }
}

impl EventRecorder for RecordingEventRecorder {
    fn record(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}
