//! Circuit breaker for gating calls to one named dependency
//!
//! The breaker moves between three states:
//!
//! - `Closed`: calls pass through; consecutive failures are counted and the
//!   breaker trips once they reach `failure_threshold`.
//! - `Open`: calls are rejected with a typed [`CircuitOpenError`] carrying the
//!   remaining recovery time. The breaker never leaves this state on its own;
//!   the first admission check after `recovery_timeout` moves it to
//!   `HalfOpen`.
//! - `HalfOpen`: up to `half_open_max_calls` probes run concurrently. Any
//!   probe failure reopens the circuit, `success_threshold` consecutive probe
//!   successes close it.
//!
//! Errors whose [`ErrorClassification::error_kind`] is listed in
//! `excluded_error_kinds` are passed through without counting as failures.
//! All counters live behind one mutex per breaker.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::{CommonError, ErrorClassification};
use crate::observability::{MetricsCollector, NoOpMetricsCollector};
use crate::utils::serde::duration_millis;

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing
///
/// Breakers read the monotonic clock to decide when the recovery timeout has
/// elapsed and the wall clock to stamp metrics snapshots.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis =
            self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock backed by tokio's timer
///
/// Follows `tokio::time::pause`/`advance`, so breakers embedded in async
/// services can be driven from paused-time tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Time only moves when the test calls [`advance`](MockClock::advance).
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.elapsed()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Rejection returned while a circuit is open
///
/// Distinct from any dependency error so callers can branch to fallback logic
/// without inspecting the underlying error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit '{name}' is open, retry in {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,
    /// Time left until the breaker admits a half-open probe
    pub retry_after: Duration,
}

impl From<CircuitOpenError> for CommonError {
    fn from(err: CircuitOpenError) -> Self {
        CommonError::circuit_breaker_with_retry(err.name, err.retry_after)
    }
}

/// Errors produced by a breaker-guarded call
///
/// Generic over the wrapped operation's error type so the original error is
/// returned unchanged after it has been recorded.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error(transparent)]
    CircuitOpen(CircuitOpenError),

    /// Operation exceeded its cooperative deadline
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Retry-after hint when the circuit rejected the call
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen(open) => Some(open.retry_after),
            _ => None,
        }
    }

    /// Returns the wrapped operation error, if the operation actually ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

//==============================================================================
// Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl CircuitState {
    /// snake_case label used in logs, metrics, and status payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u64,
    /// Time to wait before admitting a half-open probe
    #[serde(with = "duration_millis", rename = "recovery_timeout_ms")]
    pub recovery_timeout: Duration,
    /// Maximum number of concurrent probes in half-open state
    pub half_open_max_calls: u64,
    /// Consecutive probe successes needed to close the circuit
    pub success_threshold: u64,
    /// Error kinds that never count as failures
    pub excluded_error_kinds: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 2,
            excluded_error_kinds: vec!["validation".to_string()],
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    fn is_excluded(&self, kind: &str) -> bool {
        self.excluded_error_kinds.iter().any(|excluded| excluded == kind)
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Add an error kind that must not count as a failure
    pub fn exclude_error_kind(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        if !self.config.excluded_error_kinds.contains(&kind) {
            self.config.excluded_error_kinds.push(kind);
        }
        self
    }

    /// Replace the excluded error kinds
    pub fn excluded_error_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_error_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive failures counted toward the trip threshold
    pub failure_count: u64,
    /// Consecutive successes in the current half-open window
    pub success_count: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<SystemTime>,
    pub last_state_change: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    half_open_in_flight: u64,
    total_calls: u64,
    rejected_calls: u64,
    opened_at: Option<Instant>,
    last_failure_time: Option<SystemTime>,
    last_state_change: SystemTime,
    /// Bumped on every state change; stale probe completions are ignored
    generation: u64,
}

type Transition = (CircuitState, CircuitState);

/// Call-gating state machine for one dependency
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: C,
    metrics: Arc<dyn MetricsCollector>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.system_time();

        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                total_calls: 0,
                rejected_calls: 0,
                opened_at: None,
                last_failure_time: None,
                last_state_change: now,
                generation: 0,
            }),
            clock,
            metrics: Arc::new(NoOpMetricsCollector),
        })
    }

    /// Report transitions and rejections to a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call may proceed right now
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here and the caller takes one probe slot. Pair every `Ok` with a later
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow_call(&self) -> Result<(), CircuitOpenError> {
        self.admit().map(|_| ())
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// The operation's own error is returned unchanged inside
    /// [`ResilienceError::OperationFailed`] after it has been recorded.
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        let admission = self.admit().map_err(ResilienceError::CircuitOpen)?;

        match operation().await {
            Ok(value) => {
                self.complete(admission, Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                let outcome = if self.config.is_excluded(error.error_kind()) {
                    debug!(breaker = %self.name, kind = error.error_kind(), "Excluded error, not counted");
                    Outcome::Neutral
                } else {
                    Outcome::Failure
                };
                self.complete(admission, outcome);
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Like [`call`](Self::call) but with a cooperative deadline
    ///
    /// An elapsed deadline drops the operation future and counts as a failure.
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        let admission = self.admit().map_err(ResilienceError::CircuitOpen)?;

        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.complete(admission, Outcome::Success);
                Ok(value)
            }
            Ok(Err(error)) => {
                let outcome = if self.config.is_excluded(error.error_kind()) {
                    Outcome::Neutral
                } else {
                    Outcome::Failure
                };
                self.complete(admission, outcome);
                Err(ResilienceError::OperationFailed { source: error })
            }
            Err(_) => {
                self.complete(admission, Outcome::Failure);
                Err(ResilienceError::Timeout { timeout })
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.complete_unscoped(Outcome::Success);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.complete_unscoped(Outcome::Failure);
    }

    /// Force the circuit closed and clear all counters
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.half_open_in_flight = 0;
            inner.opened_at = None;
            self.set_state(&mut inner, CircuitState::Closed);
            (from, CircuitState::Closed)
        };
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
        self.report_transition(Some(transition));
    }

    /// Force the circuit open, e.g. for planned maintenance
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            self.trip(&mut inner);
            (from, CircuitState::Open)
        };
        warn!(breaker = %self.name, "Circuit breaker forced open");
        self.report_transition(Some(transition));
    }

    /// Current state without side effects
    ///
    /// Does not perform the lazy open to half-open move.
    pub fn get_status(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Alias for [`get_status`](Self::get_status)
    pub fn state(&self) -> CircuitState {
        self.get_status()
    }

    /// Snapshot of counters taken under the breaker lock
    pub fn get_metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            last_failure_time: inner.last_failure_time,
            last_state_change: inner.last_state_change,
        }
    }

    /// Time left before an open circuit admits a probe
    pub fn remaining_recovery_time(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config.recovery_timeout.saturating_sub(self.clock.now().duration_since(opened_at)),
            ),
            _ => None,
        }
    }

    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let (result, transition) = {
            let mut inner = self.inner.lock();
            let mut transition = None;
            let mut rejection = None;

            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::MAX, |opened_at| self.clock.now().duration_since(opened_at));
                if elapsed >= self.config.recovery_timeout {
                    inner.half_open_in_flight = 0;
                    inner.success_count = 0;
                    self.set_state(&mut inner, CircuitState::HalfOpen);
                    transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                } else {
                    rejection = Some(self.config.recovery_timeout - elapsed);
                }
            }

            let result = match (rejection, inner.state) {
                (Some(retry_after), _) => Err(retry_after),
                (None, CircuitState::Closed) => {
                    inner.total_calls += 1;
                    Ok(Admission::Normal)
                }
                (None, CircuitState::HalfOpen)
                    if inner.half_open_in_flight < self.config.half_open_max_calls =>
                {
                    inner.half_open_in_flight += 1;
                    inner.total_calls += 1;
                    Ok(Admission::Probe { generation: inner.generation })
                }
                // Probe slots are taken; the next slot frees as soon as a
                // probe completes.
                (None, CircuitState::HalfOpen) => Err(Duration::ZERO),
                (None, CircuitState::Open) => Err(self.config.recovery_timeout),
            };
            if result.is_err() {
                inner.rejected_calls += 1;
            }
            (result, transition)
        };

        if transition.is_some() {
            info!(breaker = %self.name, "Circuit breaker half-open, admitting probes");
            self.report_transition(transition);
        }

        result.map_err(|retry_after| {
            debug!(breaker = %self.name, ?retry_after, "Circuit breaker rejecting call");
            self.metrics
                .increment_counter("vigil_circuit_rejections_total", &[("breaker", &self.name)]);
            CircuitOpenError { name: self.name.clone(), retry_after }
        })
    }

    fn complete(&self, admission: Admission, outcome: Outcome) {
        let transition = {
            let mut inner = self.inner.lock();
            if let Admission::Probe { generation } = admission {
                if generation == inner.generation {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
            }
            self.apply_outcome(&mut inner, outcome)
        };
        self.report_transition(transition);
    }

    fn complete_unscoped(&self, outcome: Outcome) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
            self.apply_outcome(&mut inner, outcome)
        };
        self.report_transition(transition);
    }

    fn apply_outcome(&self, inner: &mut BreakerState, outcome: Outcome) -> Option<Transition> {
        match (inner.state, outcome) {
            (_, Outcome::Neutral) => None,
            (CircuitState::Closed, Outcome::Success) => {
                inner.failure_count = 0;
                None
            }
            (CircuitState::Closed, Outcome::Failure) => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(self.clock.system_time());
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker tripped"
                    );
                    self.trip(inner);
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(
                        breaker = %self.name,
                        successes = inner.success_count,
                        "Circuit breaker closed after successful probes"
                    );
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.half_open_in_flight = 0;
                    inner.opened_at = None;
                    self.set_state(inner, CircuitState::Closed);
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.last_failure_time = Some(self.clock.system_time());
                warn!(breaker = %self.name, "Probe failed, circuit breaker reopened");
                self.trip(inner);
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            (CircuitState::Open, Outcome::Failure) => {
                inner.last_failure_time = Some(self.clock.system_time());
                None
            }
            (CircuitState::Open, Outcome::Success) => None,
        }
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.opened_at = Some(self.clock.now());
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        self.set_state(inner, CircuitState::Open);
    }

    fn set_state(&self, inner: &mut BreakerState, state: CircuitState) {
        inner.state = state;
        inner.last_state_change = self.clock.system_time();
        inner.generation = inner.generation.wrapping_add(1);
    }

    fn report_transition(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.metrics.increment_counter(
                "vigil_circuit_transitions_total",
                &[("breaker", &self.name), ("from", from.as_str()), ("to", to.as_str())],
            );
        }
    }
}
