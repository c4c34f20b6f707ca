//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: polling and timeout helpers that respect tokio's
//!   paused clock
//! - **[`mocks`]**: recording implementations of the observability traits
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "runtime")]
//! # {
//! use vigil_common::testing::RecordingMetrics;
//! use vigil_common::MetricsCollector;
//!
//! let metrics = RecordingMetrics::new();
//! metrics.increment_counter("vigil_jobs_total", &[("queue", "alerts")]);
//! assert_eq!(metrics.counter("vigil_jobs_total"), 1);
//! # }
//! ```

pub mod async_utils;
pub mod mocks;

pub use async_utils::{poll_until, timeout_ok};
pub use mocks::{RecordingEventRecorder, RecordingMetrics};
