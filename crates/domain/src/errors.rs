//! Error types used throughout the workspace

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use vigil_common::resilience::{CircuitOpenError, ResilienceError};

/// Main error type for Vigil
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum VigilError {
    /// Pub/sub or job broker failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Outbound HTTP-style call failed
    #[error("Transport error: {message}")]
    Transport { message: String, status: Option<u16>, body: Option<String> },

    /// Connection to a client or dependency was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed input; never counts toward breaker thresholds
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Circuit '{name}' is open (retry in {retry_after_ms}ms)")]
    CircuitOpen { name: String, retry_after_ms: u64 },

    #[error("Operation '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A bounded queue or ring refused new work
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

impl VigilError {
    pub fn transport(message: impl Into<String>, status: Option<u16>, body: Option<String>) -> Self {
        Self::Transport { message: message.into(), status, body }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// HTTP status carried by transport errors
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Response body carried by transport errors
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Transport { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl ErrorClassification for VigilError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Broker(_) | Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Storage(_) | Self::CircuitOpen { .. } => true,
            // 4xx responses other than throttling will fail the same way again
            Self::Transport { status, .. } => {
                !matches!(status, Some(code) if (400..500).contains(code) && *code != 429)
            }
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation(_) | Self::NotFound(_) => ErrorSeverity::Info,
            Self::CircuitOpen { .. } | Self::Timeout { .. } | Self::ResourceExhausted(_) => {
                ErrorSeverity::Warning
            }
            Self::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after_ms, .. } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }

    fn error_kind(&self) -> &'static str {
        match self {
            Self::Broker(_) => "broker",
            Self::Transport { .. } => "transport",
            Self::Connection(_) => "connection",
            Self::Validation(_) => "validation",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<CircuitOpenError> for VigilError {
    fn from(err: CircuitOpenError) -> Self {
        Self::CircuitOpen {
            name: err.name,
            retry_after_ms: u64::try_from(err.retry_after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<ResilienceError<VigilError>> for VigilError {
    fn from(err: ResilienceError<VigilError>) -> Self {
        match err {
            ResilienceError::CircuitOpen(open) => open.into(),
            ResilienceError::Timeout { timeout } => Self::timeout("guarded call", timeout),
            ResilienceError::OperationFailed { source } => source,
        }
    }
}

impl From<CommonError> for VigilError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Config { .. } => Self::Config(err.to_string()),
            CommonError::CircuitBreakerOpen { service, retry_after } => Self::CircuitOpen {
                name: service,
                retry_after_ms: retry_after
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            },
            CommonError::Serialization { .. } => Self::Serialization(err.to_string()),
            CommonError::Persistence { .. } => Self::Storage(err.to_string()),
            CommonError::Timeout { operation, duration } => Self::timeout(operation, duration),
            CommonError::Backend { .. } => Self::Broker(err.to_string()),
            CommonError::Validation { .. } => Self::Validation(err.to_string()),
            CommonError::NotFound { .. } => Self::NotFound(err.to_string()),
            CommonError::CapacityExceeded { .. } => Self::ResourceExhausted(err.to_string()),
            CommonError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_helpers() {
        let err = VigilError::transport("upstream 503", Some(503), Some("busy".into()));
        assert_eq!(err.http_status(), Some(503));
        assert_eq!(err.response_body(), Some("busy"));
        assert!(err.is_retryable());
        assert_eq!(err.error_kind(), "transport");

        let client_err = VigilError::transport("bad request", Some(400), None);
        assert!(!client_err.is_retryable());
        assert!(VigilError::transport("throttled", Some(429), None).is_retryable());
    }

    /// Validates circuit-open conversions keep the retry hint.
    #[test]
    fn test_circuit_open_conversion() {
        let open = CircuitOpenError { name: "dlq_overflow".into(), retry_after: Duration::from_millis(1500) };
        let err: VigilError = open.into();
        assert!(err.is_circuit_open());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_validation_kind_and_severity() {
        let err = VigilError::Validation("missing type".into());
        assert_eq!(err.error_kind(), "validation");
        assert_eq!(err.severity(), ErrorSeverity::Info);
        assert!(!err.is_retryable());
    }

    /// Validates the adjacently tagged wire format.
    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(VigilError::Broker("down".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Broker", "message": "down"}));

        let back: VigilError = serde_json::from_value(json).unwrap();
        assert_eq!(back, VigilError::Broker("down".into()));
    }

    #[test]
    fn test_from_resilience_error_unwraps_source() {
        let err: VigilError =
            ResilienceError::OperationFailed { source: VigilError::Broker("refused".into()) }.into();
        assert_eq!(err, VigilError::Broker("refused".into()));
    }

    #[test]
    fn test_from_common_error() {
        let err: VigilError = CommonError::timeout("health_check", Duration::from_secs(10)).into();
        assert_eq!(err, VigilError::Timeout { operation: "health_check".into(), after_ms: 10_000 });
    }
}
