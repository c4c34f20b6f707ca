//! Bounded exponential-backoff retries
//!
//! Delays follow `min(base_delay * exponential_base^(attempt - 1), max_delay)`
//! with attempt numbering starting at 1. With jitter enabled, up to 25% of the
//! computed delay is added on top and the result is clamped to `max_delay`
//! again. Within one execution the executor never sleeps less than it slept
//! the previous time, so jitter cannot make the schedule shrink.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::utils::serde::duration_millis;

/// Fraction of the computed delay added at most by jitter
pub const JITTER_FACTOR: f64 = 0.25;

/// Invalid retry configuration
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invalid retry configuration: {message}")]
pub struct RetryConfigError {
    pub message: String,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_retries: u32,
    #[serde(with = "duration_millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_retries == 0 {
            return Err(RetryConfigError {
                message: "max_retries must be greater than 0".to_string(),
            });
        }

        if !(self.exponential_base.is_finite() && self.exponential_base >= 1.0) {
            return Err(RetryConfigError {
                message: "exponential_base must be a finite number >= 1.0".to_string(),
            });
        }

        if self.max_delay < self.base_delay {
            return Err(RetryConfigError {
                message: "max_delay must not be smaller than base_delay".to_string(),
            });
        }

        Ok(())
    }

    /// Backoff schedule described by this configuration
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            exponential_base: self.exponential_base,
            jitter_enabled: self.jitter_enabled,
        }
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter_enabled = enabled;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(false)
    }

    pub fn build(self) -> Result<RetryConfig, RetryConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Delay calculator for one retry configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSchedule {
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter_enabled: bool,
}

impl BackoffSchedule {
    /// Closed-form delay for `attempt` (1-based) without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Delay for `attempt` (1-based), jittered when enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if !self.jitter_enabled {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        let jitter = delay.mul_f64(JITTER_FACTOR * factor);
        (delay + jitter).min(self.max_delay)
    }
}

/// Outcome of a retry execution
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result: the first success or the last error
    pub result: Result<T, E>,
    /// Attempts performed, including the first one
    pub attempts: u32,
    /// Sleeps taken between attempts, in order
    pub delays: Vec<Duration>,
    /// Whether the loop stopped early because the error was not retryable
    pub stopped_early: bool,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Sum of all backoff sleeps
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }

    /// Consume the outcome and return only the result
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs an operation until it succeeds or attempts run out
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    schedule: BackoffSchedule,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Result<Self, RetryConfigError> {
        config.validate()?;
        let schedule = config.schedule();
        Ok(Self { config, schedule })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry every error
    #[instrument(skip(self, operation), fields(max_retries = self.config.max_retries))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(operation, |_| true).await
    }

    /// Retry only errors for which `should_retry` returns true
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut delays = Vec::new();
        let mut previous = Duration::ZERO;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, delays, stopped_early: false };
                }
                Err(error) => {
                    if !should_retry(&error) {
                        debug!(attempt, %error, "Error is not retryable, giving up");
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                            delays,
                            stopped_early: true,
                        };
                    }

                    if attempt >= self.config.max_retries {
                        warn!(attempts = attempt, %error, "All retry attempts exhausted");
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                            delays,
                            stopped_early: false,
                        };
                    }

                    let delay = self.schedule.delay_for(attempt).max(previous);
                    warn!(attempt, ?delay, %error, "Operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    delays.push(delay);
                    previous = delay;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for backoff computation and the retry loop.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn config(max_retries: u32, jitter: bool) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(10))
            .exponential_base(2.0)
            .jitter(jitter)
            .build()
            .unwrap()
    }

    /// Validates the closed-form schedule without jitter.
    ///
    /// Assertions:
    /// - Attempts 1..=4 yield 1s, 2s, 4s, 8s.
    /// - Attempt 5 is capped at `max_delay`.
    #[test]
    fn test_closed_form_delays() {
        let schedule = config(5, false).schedule();
        assert_eq!(schedule.delay_for(1), Duration::from_secs(1));
        assert_eq!(schedule.delay_for(2), Duration::from_secs(2));
        assert_eq!(schedule.delay_for(3), Duration::from_secs(4));
        assert_eq!(schedule.delay_for(4), Duration::from_secs(8));
        assert_eq!(schedule.delay_for(5), Duration::from_secs(10));
        assert_eq!(schedule.delay_for(40), Duration::from_secs(10));
    }

    /// Validates jitter stays within 25% and never exceeds `max_delay`.
    #[test]
    fn test_jitter_bounds() {
        let schedule = config(5, true).schedule();
        for attempt in 1..=6 {
            let base = schedule.base_delay_for(attempt);
            for _ in 0..50 {
                let jittered = schedule.delay_for(attempt);
                assert!(jittered >= base);
                assert!(jittered <= base.mul_f64(1.0 + JITTER_FACTOR));
                assert!(jittered <= Duration::from_secs(10));
            }
        }
    }

    #[test]
    fn test_validation() {
        assert!(RetryConfig::builder().max_retries(0).build().is_err());
        assert!(RetryConfig::builder().exponential_base(0.5).build().is_err());
        assert!(RetryConfig::builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
    }

    /// Validates an always-failing operation runs exactly `max_retries`
    /// attempts and sleeps the closed-form delays in between.
    ///
    /// Assertions:
    /// - Three attempts, two delays of 1s and 2s.
    #[tokio::test(start_paused = true)]
    async fn test_always_failing_operation() {
        let executor = RetryExecutor::new(config(3, false)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let outcome = executor
            .execute(|_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("broker unavailable")
                }
            })
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    /// Validates early success stops the loop.
    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt() {
        let executor = RetryExecutor::new(config(5, true)).unwrap();
        let outcome = executor
            .execute(|attempt| async move {
                if attempt < 2 {
                    Err("transient")
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.delays.len(), 1);
        assert_eq!(outcome.into_result(), Ok(2));
    }

    /// Validates a non-retryable error stops immediately.
    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_early() {
        let executor = RetryExecutor::new(config(5, false)).unwrap();
        let outcome = executor
            .execute_if(|_| async { Err::<(), _>("invalid payload") }, |e| !e.starts_with("invalid"))
            .await;

        assert!(outcome.stopped_early);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.delays.is_empty());
    }

    /// Validates the jittered schedule is non-decreasing within one run.
    #[tokio::test(start_paused = true)]
    async fn test_jittered_delays_non_decreasing() {
        let cfg = RetryConfig::builder()
            .max_retries(8)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .exponential_base(1.1)
            .jitter(true)
            .build()
            .unwrap();
        let executor = RetryExecutor::new(cfg).unwrap();
        let outcome = executor.execute(|_| async { Err::<(), _>("down") }).await;

        assert_eq!(outcome.delays.len(), 7);
        for pair in outcome.delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(outcome.delays.iter().all(|d| *d <= Duration::from_millis(500)));
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let json = serde_json::to_value(config(3, false)).unwrap();
        assert_eq!(json["base_delay_ms"], 1000);
        assert_eq!(json["max_delay_ms"], 10000);
    }
}
