//! Observability hooks
//!
//! Resilience components report through two small traits instead of
//! depending on a concrete metrics or logging backend:
//! - [`MetricsCollector`]: named counters, gauges, and histograms with labels
//! - [`EventRecorder`]: structured log records with a severity
//!
//! The infra crate provides the production sink; tests use the recording
//! doubles in [`crate::testing::mocks`].

pub mod traits;

pub use traits::{
    EventRecorder, LogRecord, LogSeverity, MetricsCollector, NoOpEventRecorder,
    NoOpMetricsCollector,
};
