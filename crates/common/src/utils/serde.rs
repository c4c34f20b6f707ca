//! Serialization utilities for common data types
//!
//! Configuration files and wire payloads express durations as integer
//! milliseconds; these modules plug into `#[serde(with = ...)]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde adapter for `Duration` as milliseconds (u64).
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
/// use vigil_common::duration_millis;
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde adapter for `Option<Duration>` as optional milliseconds.
pub mod option_duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Timeouts {
        #[serde(with = "duration_millis")]
        recovery_timeout: Duration,
        #[serde(with = "option_duration_millis", default)]
        fallback_ttl: Option<Duration>,
    }

    /// Tests that Duration serializes to milliseconds as u64
    #[test]
    fn test_duration_millis_serialize() {
        let data = Timeouts { recovery_timeout: Duration::from_millis(1500), fallback_ttl: None };

        let json = serde_json::to_string(&data).expect("Should serialize valid struct");
        assert!(json.contains("\"recovery_timeout\":1500"));
        assert!(json.contains("\"fallback_ttl\":null"));
    }

    /// Tests that missing optional durations default to `None`
    #[test]
    fn test_option_duration_defaults_to_none() {
        let json = r#"{"recovery_timeout":2500}"#;
        let data: Timeouts = serde_json::from_str(json).expect("Should deserialize valid JSON");

        assert_eq!(data.recovery_timeout, Duration::from_millis(2500));
        assert_eq!(data.fallback_ttl, None);
    }

    #[test]
    fn test_option_duration_present() {
        let json = r#"{"recovery_timeout":0,"fallback_ttl":86400000}"#;
        let data: Timeouts = serde_json::from_str(json).expect("Should deserialize valid JSON");

        assert_eq!(data.recovery_timeout, Duration::ZERO);
        assert_eq!(data.fallback_ttl, Some(Duration::from_secs(86_400)));
    }

    /// Validates the duration millis deserialize invalid json scenario.
    ///
    /// Assertions:
    /// - Ensures `result.is_err()` evaluates to true.
    #[test]
    fn test_duration_millis_deserialize_invalid_json() {
        let invalid_json = r#"{"recovery_timeout":"soon"}"#;
        let result: Result<Timeouts, _> = serde_json::from_str(invalid_json);
        assert!(result.is_err());
    }
}
