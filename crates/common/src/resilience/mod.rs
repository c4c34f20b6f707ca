//! Resilience patterns for fault tolerance
//!
//! - **Circuit Breaker**: stops calling a failing dependency after repeated
//!   failures and probes for recovery after a timeout
//! - **Retry**: bounded exponential backoff with optional jitter
//! - **Registry**: name-keyed lookup of shared breakers
//!
//! Both the breaker and the retry executor are generic over the wrapped
//! operation's result and error types; the breaker additionally needs
//! [`ErrorClassification`](crate::error::ErrorClassification) to tell
//! excluded error kinds apart.

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitOpenError, CircuitState, Clock, ConfigError, ConfigResult, MockClock, ResilienceError,
    ResilienceResult, SystemClock, TokioClock,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{
    BackoffSchedule, RetryConfig, RetryConfigBuilder, RetryConfigError, RetryExecutor,
    RetryOutcome, JITTER_FACTOR,
};
