//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Read `.env` into the process environment if one exists
//! 2. Load the file named by `VIGIL_CONFIG`, else the first file found by
//!    [`probe_config_paths`], else start from defaults
//! 3. Apply `VIGIL_*` overrides on top
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `VIGIL_CONFIG`: Explicit config file path
//! - `VIGIL_CHANNEL`: Pub/sub channel the listener subscribes to
//! - `VIGIL_REPLAY_CAPACITY`: Replay ring size
//! - `VIGIL_COMPRESSION_THRESHOLD`: Payload size in bytes that triggers gzip
//! - `VIGIL_HEARTBEAT_INTERVAL_MS`: Ping interval, `0` disables pings
//! - `VIGIL_MAX_RECOVERY_ATTEMPTS`: Listener restarts before degrading
//! - `VIGIL_RETRY_MAX_RETRIES`: Job retry budget
//! - `VIGIL_RETRY_BASE_DELAY_MS`: First backoff delay
//! - `VIGIL_HEALTH_CHECK_INTERVAL_MS`: Degradation check interval
//! - `VIGIL_FALLBACK_CAPACITY`: In-memory fallback ring size per queue
//! - `VIGIL_FALLBACK_DIR`: Directory for disk-backed fallback queues
//! - `VIGIL_OVERFLOW_POLICY`: `drop_oldest`, `reject_new` or `escalate_to_dlq`
//! - `VIGIL_LOG_LEVEL`: `EnvFilter` directive
//! - `VIGIL_LOG_JSON`: JSON log output (true/false)
//!
//! ## File Locations
//! Probed in order, TOML or JSON by extension:
//! 1. `./vigil.toml`, `./vigil.json`, `./config.toml`, `./config.json`
//! 2. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use vigil_domain::{Config, OverflowPolicy, Result, VigilError};

const CONFIG_FILE_NAMES: [&str; 4] = ["vigil.toml", "vigil.json", "config.toml", "config.json"];

/// Load configuration from the first available source plus env overrides
///
/// # Errors
/// Returns `VigilError::Config` if a named file is missing or malformed, an
/// override does not parse, or the merged config fails validation.
pub fn load() -> Result<Config> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to read .env file");
        }
    }

    let mut config = match std::env::var_os("VIGIL_CONFIG") {
        Some(path) => load_from_file(Some(PathBuf::from(path)))?,
        None => match probe_config_paths() {
            Some(path) => load_from_file(Some(path))?,
            None => {
                tracing::info!("No config file found, using defaults");
                Config::default()
            }
        },
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus `VIGIL_*` overrides, ignoring config files
///
/// # Errors
/// Returns `VigilError::Config` if an override does not parse or the result
/// fails validation.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Missing sections and
/// fields keep their defaults.
///
/// # Errors
/// Returns `VigilError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(VigilError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            VigilError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| VigilError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration by file extension (`.json` or `.toml`)
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| VigilError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| VigilError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(VigilError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// First existing config file in the working directory, then next to the
/// executable
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Apply `VIGIL_*` variables on top of `config`
///
/// # Errors
/// Returns `VigilError::Config` naming the variable that failed to parse.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(channel) = env_string("VIGIL_CHANNEL") {
        config.broadcaster.channel = channel;
    }
    if let Some(capacity) = env_parse("VIGIL_REPLAY_CAPACITY")? {
        config.broadcaster.replay_capacity = capacity;
    }
    if let Some(threshold) = env_parse("VIGIL_COMPRESSION_THRESHOLD")? {
        config.broadcaster.compression_threshold = threshold;
    }
    if let Some(ms) = env_parse::<u64>("VIGIL_HEARTBEAT_INTERVAL_MS")? {
        config.broadcaster.heartbeat_interval = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(attempts) = env_parse("VIGIL_MAX_RECOVERY_ATTEMPTS")? {
        config.broadcaster.max_recovery_attempts = attempts;
    }
    if let Some(retries) = env_parse("VIGIL_RETRY_MAX_RETRIES")? {
        config.retry.max_retries = retries;
    }
    if let Some(ms) = env_parse("VIGIL_RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse("VIGIL_HEALTH_CHECK_INTERVAL_MS")? {
        config.degradation.check_interval = Duration::from_millis(ms);
    }
    if let Some(capacity) = env_parse("VIGIL_FALLBACK_CAPACITY")? {
        config.degradation.memory_queue_capacity = capacity;
    }
    if let Some(dir) = env_string("VIGIL_FALLBACK_DIR") {
        config.degradation.fallback_dir = Some(PathBuf::from(dir));
    }
    if let Some(policy) = env_string("VIGIL_OVERFLOW_POLICY") {
        config.degradation.overflow_policy = parse_overflow_policy(&policy)?;
    }
    if let Some(level) = env_string("VIGIL_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("VIGIL_LOG_JSON", config.logging.json);
    Ok(())
}

fn parse_overflow_policy(value: &str) -> Result<OverflowPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "drop_oldest" => Ok(OverflowPolicy::DropOldest),
        "reject_new" => Ok(OverflowPolicy::RejectNew),
        "escalate_to_dlq" => Ok(OverflowPolicy::EscalateToDlq),
        other => Err(VigilError::Config(format!("Invalid VIGIL_OVERFLOW_POLICY: {}", other))),
    }
}

/// Non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| VigilError::Config(format!("Invalid {}: {}", key, e)))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use parking_lot::Mutex;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

    const OVERRIDE_VARS: [&str; 6] = [
        "VIGIL_CHANNEL",
        "VIGIL_REPLAY_CAPACITY",
        "VIGIL_HEARTBEAT_INTERVAL_MS",
        "VIGIL_OVERFLOW_POLICY",
        "VIGIL_LOG_JSON",
        "VIGIL_FALLBACK_DIR",
    ];

    fn clear_overrides() {
        for key in OVERRIDE_VARS {
            std::env::remove_var(key);
        }
    }

    fn write_temp(content: &str, extension: &str) -> PathBuf {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        let path = temp_file.path().with_extension(extension);
        std::fs::copy(temp_file.path(), &path).unwrap();
        path
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock();

        std::env::set_var("VIGIL_TEST_BOOL_YES", "YES");
        std::env::set_var("VIGIL_TEST_BOOL_OFF", "off");
        std::env::remove_var("VIGIL_TEST_BOOL_MISSING");

        assert!(env_bool("VIGIL_TEST_BOOL_YES", false));
        assert!(!env_bool("VIGIL_TEST_BOOL_OFF", true));
        assert!(env_bool("VIGIL_TEST_BOOL_MISSING", true));

        std::env::remove_var("VIGIL_TEST_BOOL_YES");
        std::env::remove_var("VIGIL_TEST_BOOL_OFF");
    }

    /// Validates env overrides land on the right fields.
    ///
    /// Assertions:
    /// - A heartbeat of `0` disables pings.
    /// - Overflow policy and JSON logging are parsed.
    /// - Untouched fields keep their defaults.
    #[test]
    fn test_load_from_env_overrides() {
        let _guard = ENV_LOCK.lock();
        clear_overrides();

        std::env::set_var("VIGIL_CHANNEL", "camera-events");
        std::env::set_var("VIGIL_REPLAY_CAPACITY", "250");
        std::env::set_var("VIGIL_HEARTBEAT_INTERVAL_MS", "0");
        std::env::set_var("VIGIL_OVERFLOW_POLICY", "escalate_to_dlq");
        std::env::set_var("VIGIL_LOG_JSON", "true");

        let result = load_from_env();
        clear_overrides();

        let config = result.unwrap();
        assert_eq!(config.broadcaster.channel, "camera-events");
        assert_eq!(config.broadcaster.replay_capacity, 250);
        assert_eq!(config.broadcaster.heartbeat_interval, None);
        assert_eq!(config.degradation.overflow_policy, OverflowPolicy::EscalateToDlq);
        assert!(config.logging.json);
        assert_eq!(config.retry, Config::default().retry);
    }

    #[test]
    fn test_load_from_env_invalid_values() {
        let _guard = ENV_LOCK.lock();
        clear_overrides();

        std::env::set_var("VIGIL_REPLAY_CAPACITY", "lots");
        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("VIGIL_REPLAY_CAPACITY"));

        std::env::set_var("VIGIL_REPLAY_CAPACITY", "0");
        assert!(matches!(load_from_env(), Err(VigilError::Config(_))));
        clear_overrides();

        std::env::set_var("VIGIL_OVERFLOW_POLICY", "shrug");
        assert!(load_from_env().is_err());
        clear_overrides();
    }

    #[test]
    fn test_load_from_file_toml() {
        let path = write_temp(
            r#"
[broadcaster]
channel = "events"
replay_capacity = 50
heartbeat_interval_ms = 10000

[degradation]
overflow_policy = "reject_new"
fallback_dir = "/var/lib/vigil/fallback"

[retry]
max_retries = 5
base_delay_ms = 250
"#,
            "toml",
        );

        let config = load_from_file(Some(path.clone())).unwrap();
        assert_eq!(config.broadcaster.channel, "events");
        assert_eq!(config.broadcaster.replay_capacity, 50);
        assert_eq!(config.broadcaster.heartbeat_interval, Some(Duration::from_secs(10)));
        assert_eq!(config.degradation.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.degradation.fallback_dir, Some(PathBuf::from("/var/lib/vigil/fallback")));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.dlq, Config::default().dlq);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_json() {
        let path = write_temp(r#"{ "logging": { "level": "vigil=debug", "json": true } }"#, "json");

        let config = load_from_file(Some(path.clone())).unwrap();
        assert_eq!(config.logging.level, "vigil=debug");
        assert!(config.logging.json);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_errors() {
        let missing = load_from_file(Some(PathBuf::from("/nonexistent/vigil.toml")));
        assert!(matches!(missing, Err(VigilError::Config(_))));

        let path = write_temp(r#"{ "broadcaster": "#, "json");
        assert!(load_from_file(Some(path.clone())).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("channel: events", &PathBuf::from("vigil.yaml"));
        assert!(matches!(result, Err(VigilError::Config(_))));
    }

    /// Validates `load` honors `VIGIL_CONFIG` and then env overrides.
    ///
    /// Assertions:
    /// - File values apply.
    /// - An env override beats the file.
    #[test]
    fn test_load_merges_file_and_env() {
        let _guard = ENV_LOCK.lock();
        clear_overrides();

        let path = write_temp("[broadcaster]\nchannel = \"from-file\"\nreplay_capacity = 75\n", "toml");
        std::env::set_var("VIGIL_CONFIG", &path);
        std::env::set_var("VIGIL_CHANNEL", "from-env");

        let result = load();
        std::env::remove_var("VIGIL_CONFIG");
        clear_overrides();
        std::fs::remove_file(path).ok();

        let config = result.unwrap();
        assert_eq!(config.broadcaster.channel, "from-env");
        assert_eq!(config.broadcaster.replay_capacity, 75);
    }
}
