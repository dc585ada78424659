//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingConfig;
use crate::error::Error;

/// Build the filter: `RUST_LOG` wins, then the configured directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, Error> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(raw) if !raw.trim().is_empty() => EnvFilter::try_new(raw)
            .map_err(|e| Error::Logging(format!("invalid RUST_LOG directive: {e}"))),
        _ => EnvFilter::try_new(&config.filter)
            .map_err(|e| Error::Logging(format!("invalid log filter '{}': {e}", config.filter))),
    }
}

/// Install the global subscriber. Human-readable by default, JSON lines when
/// `config.json` is set.
pub fn init(config: &LoggingConfig) -> Result<(), Error> {
    let filter = env_filter(config)?;

    let fmt_layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_level(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_filter_directive() {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }
        let config = LoggingConfig {
            json: false,
            filter: "multisig_session=notalevel".to_string(),
        };
        assert!(matches!(env_filter(&config), Err(Error::Logging(_))));
    }

    #[test]
    fn default_filter_parses() {
        assert!(env_filter(&LoggingConfig::default()).is_ok());
    }
}
