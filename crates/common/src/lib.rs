//! Shared building blocks for the Vigil crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, collections, serde helpers
//! - `runtime`: circuit breakers, retry backoff, compression, observability
//!   hooks, async test helpers
//! - `observability`: tracing integration (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod compression;
#[cfg(feature = "runtime")]
pub mod observability;
#[cfg(feature = "runtime")]
pub mod resilience;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use collections::RingBuffer;
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use observability::{
    EventRecorder, LogRecord, LogSeverity, MetricsCollector, NoOpEventRecorder,
    NoOpMetricsCollector,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffSchedule, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitOpenError, CircuitState, Clock,
    MockClock, ResilienceError, ResilienceResult, RetryConfig, RetryConfigBuilder, RetryOutcome,
    SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
