//! Global subscriber setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use vigil_domain::{LoggingConfig, Result, VigilError};

/// Install the global subscriber
///
/// `RUST_LOG` wins over `config.level`. Fails if a subscriber is already
/// installed or the level directive does not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| VigilError::Config(format!("logging.level '{}': {}", config.level, e)))?,
    };

    let json_layer = config.json.then(|| fmt::layer().json().with_current_span(false));
    let text_layer = (!config.json).then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| VigilError::Config(format!("tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates only one global subscriber can be installed.
    ///
    /// Assertions:
    /// - A bad level directive is a config error.
    /// - The first valid call succeeds and the second reports the conflict.
    #[test]
    fn test_init_tracing_once() {
        let bad = LoggingConfig { level: "vigil=notalevel".to_string(), json: false };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(init_tracing(&bad), Err(VigilError::Config(_))));
        }

        let config = LoggingConfig { level: "debug".to_string(), json: true };
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_err());
    }
}
