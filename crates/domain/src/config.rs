//! Configuration management
//!
//! Every section implements `Default` with the production values and
//! deserializes with `#[serde(default)]`, so partial files only override what
//! they name. Durations are written as milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_common::resilience::{CircuitBreakerConfig, RetryConfig};
use vigil_common::utils::{duration_millis, option_duration_millis};

use crate::constants::{
    DEFAULT_COMPRESSION_THRESHOLD_BYTES, DEFAULT_EVENT_CHANNEL, HEALTH_CHECK_INTERVAL_SECS,
    HEALTH_CHECK_TIMEOUT_SECS, HEALTH_FAILURE_THRESHOLD, HEALTH_RECOVERY_THRESHOLD,
    MAX_LISTENER_RECOVERY_ATTEMPTS, MEMORY_FALLBACK_CAPACITY, REPLAY_BUFFER_CAPACITY,
    SUPERVISOR_POLL_SECS,
};
use crate::errors::{Result, VigilError};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broadcaster: BroadcasterConfig,
    /// Retry policy for jobs wrapped by the retry handler
    pub retry: RetryConfig,
    pub dlq: DlqConfig,
    pub degradation: DegradationConfig,
    /// Default breaker settings for registered dependencies
    pub circuit_breaker: CircuitBreakerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject configurations that would disable a safety bound
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().map_err(|e| VigilError::Config(format!("retry: {}", e)))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| VigilError::Config(format!("circuit_breaker: {}", e)))?;
        self.broadcaster.validate()?;
        self.dlq.validate()?;
        self.degradation.validate()
    }
}

/// Event broadcaster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Pub/sub channel the listener subscribes to
    pub channel: String,
    pub replay_capacity: usize,
    /// Payloads at or above this many bytes are gzip-compressed
    pub compression_threshold: usize,
    #[serde(with = "duration_millis", rename = "supervisor_interval_ms")]
    pub supervisor_interval: Duration,
    /// Listener restarts allowed before the broadcaster degrades
    pub max_recovery_attempts: u32,
    /// `None` disables server pings
    #[serde(with = "option_duration_millis", rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Option<Duration>,
    #[serde(with = "duration_millis", rename = "send_timeout_ms")]
    pub send_timeout: Duration,
    #[serde(with = "duration_millis", rename = "shutdown_timeout_ms")]
    pub shutdown_timeout: Duration,
    /// Event types stamped `requires_ack`
    pub ack_required_patterns: Vec<String>,
    pub listener_breaker: CircuitBreakerConfig,
    /// Backoff applied to `broadcast_event` publishes
    pub publish_retry: RetryConfig,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_EVENT_CHANNEL.to_string(),
            replay_capacity: REPLAY_BUFFER_CAPACITY,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            supervisor_interval: Duration::from_secs(SUPERVISOR_POLL_SECS),
            max_recovery_attempts: MAX_LISTENER_RECOVERY_ATTEMPTS,
            heartbeat_interval: Some(Duration::from_secs(30)),
            send_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            ack_required_patterns: vec!["alert.*".to_string(), "incident.*".to_string()],
            listener_breaker: CircuitBreakerConfig {
                failure_threshold: u64::from(MAX_LISTENER_RECOVERY_ATTEMPTS),
                recovery_timeout: Duration::from_secs(30),
                // One listener is one probe
                success_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
            publish_retry: RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(2),
                ..RetryConfig::default()
            },
        }
    }
}

impl BroadcasterConfig {
    fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(VigilError::Config("broadcaster.channel must not be empty".into()));
        }
        if self.replay_capacity == 0 {
            return Err(VigilError::Config("broadcaster.replay_capacity must be > 0".into()));
        }
        if self.supervisor_interval.is_zero() {
            return Err(VigilError::Config("broadcaster.supervisor_interval must be > 0".into()));
        }
        if matches!(self.heartbeat_interval, Some(interval) if interval.is_zero()) {
            return Err(VigilError::Config("broadcaster.heartbeat_interval must be > 0".into()));
        }
        self.listener_breaker
            .validate()
            .map_err(|e| VigilError::Config(format!("broadcaster.listener_breaker: {}", e)))?;
        self.publish_retry
            .validate()
            .map_err(|e| VigilError::Config(format!("broadcaster.publish_retry: {}", e)))
    }
}

/// Dead-letter queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Breaker guarding DLQ writes
    pub breaker: CircuitBreakerConfig,
    /// Upper bound on entries moved by one `requeue_all`
    pub requeue_all_limit: usize,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            },
            requeue_all_limit: 1000,
        }
    }
}

impl DlqConfig {
    fn validate(&self) -> Result<()> {
        if self.requeue_all_limit == 0 {
            return Err(VigilError::Config("dlq.requeue_all_limit must be > 0".into()));
        }
        self.breaker.validate().map_err(|e| VigilError::Config(format!("dlq.breaker: {}", e)))
    }
}

/// What to do when the in-memory fallback ring is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest entry and log a warning
    #[default]
    DropOldest,
    /// Refuse the new entry
    RejectNew,
    /// Write the new entry to the dead-letter queue
    EscalateToDlq,
}

/// Degradation manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    #[serde(with = "duration_millis", rename = "check_interval_ms")]
    pub check_interval: Duration,
    #[serde(with = "duration_millis", rename = "check_timeout_ms")]
    pub check_timeout: Duration,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub memory_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Directory for disk-backed fallback queues; disabled when unset
    pub fallback_dir: Option<PathBuf>,
    #[serde(with = "duration_millis", rename = "fallback_ttl_ms")]
    pub fallback_ttl: Duration,
    #[serde(with = "duration_millis", rename = "drain_interval_ms")]
    pub drain_interval: Duration,
    pub drain_batch_size: usize,
    #[serde(with = "duration_millis", rename = "shutdown_timeout_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            check_timeout: Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS),
            failure_threshold: HEALTH_FAILURE_THRESHOLD,
            recovery_threshold: HEALTH_RECOVERY_THRESHOLD,
            memory_queue_capacity: MEMORY_FALLBACK_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            fallback_dir: None,
            fallback_ttl: Duration::from_secs(24 * 60 * 60),
            drain_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            drain_batch_size: 100,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl DegradationConfig {
    fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() || self.drain_interval.is_zero() {
            return Err(VigilError::Config("degradation intervals must be > 0".into()));
        }
        if self.check_timeout.is_zero() {
            return Err(VigilError::Config("degradation.check_timeout must be > 0".into()));
        }
        if self.failure_threshold == 0 || self.recovery_threshold == 0 {
            return Err(VigilError::Config("degradation thresholds must be > 0".into()));
        }
        if self.memory_queue_capacity == 0 || self.drain_batch_size == 0 {
            return Err(VigilError::Config(
                "degradation.memory_queue_capacity and drain_batch_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broadcaster.replay_capacity, 100);
        assert_eq!(config.degradation.failure_threshold, 3);
        assert_eq!(config.degradation.recovery_threshold, 2);
        assert_eq!(config.dlq.breaker.failure_threshold, 10);
        assert_eq!(config.broadcaster.listener_breaker.failure_threshold, 5);
    }

    /// Validates partial JSON only overrides the fields it names.
    ///
    /// Assertions:
    /// - Millisecond fields are read through their `_ms` names.
    /// - Missing sections keep their defaults.
    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "broadcaster": { "channel": "events", "heartbeat_interval_ms": null },
            "degradation": { "check_interval_ms": 500, "overflow_policy": "reject_new" }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.broadcaster.channel, "events");
        assert_eq!(config.broadcaster.heartbeat_interval, None);
        assert_eq!(config.degradation.check_interval, Duration::from_millis(500));
        assert_eq!(config.degradation.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = Config::default();
        config.broadcaster.replay_capacity = 0;
        assert!(matches!(config.validate(), Err(VigilError::Config(_))));

        let mut config = Config::default();
        config.degradation.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_retries = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry"));
    }
}
