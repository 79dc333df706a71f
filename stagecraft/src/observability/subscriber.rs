//! Global `tracing` subscriber setup.

use crate::errors::{ConfigError, StagecraftError};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured filter directive.
pub const LOG_ENV_VAR: &str = "STAGECRAFT_LOG";

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

/// Subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter used when `STAGECRAFT_LOG` is unset or invalid.
    pub default_directive: String,
    /// Output format.
    pub format: LogFormat,
    /// Include the event target.
    pub with_target: bool,
    /// Log span close events with their duration.
    pub span_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_directive: "stagecraft=info,warn".to_string(),
            format: LogFormat::Plain,
            with_target: false,
            span_events: false,
        }
    }
}

impl TracingConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Includes event targets.
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Logs span close events.
    #[must_use]
    pub fn with_span_events(mut self, span_events: bool) -> Self {
        self.span_events = span_events;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the default directive does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        EnvFilter::try_new(&self.default_directive)
            .map(|_| ())
            .map_err(|err| ConfigError::new("TracingConfig", "default_directive", err.to_string()))
    }

    /// Builds the filter: `STAGECRAFT_LOG` first, then the default directive.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_new(&self.default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global fmt subscriber.
///
/// # Errors
///
/// Returns [`StagecraftError::Config`] for an invalid config and
/// [`StagecraftError::Tracing`] if a global subscriber is already set.
pub fn init_tracing(config: &TracingConfig) -> Result<(), StagecraftError> {
    config.validate()?;

    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target)
        .with_span_events(span_events);

    let installed = match config.format {
        LogFormat::Plain => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| StagecraftError::Tracing(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TracingConfig::default();
        assert_eq!(config.format, LogFormat::Plain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        let err = TracingConfig::new()
            .with_default_directive("stagecraft=loudest")
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "default_directive");
    }

    #[test]
    fn test_loads_from_json() {
        let config: TracingConfig = serde_json::from_str(r#"{"format": "json", "span_events": true}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.default_directive, "stagecraft=info,warn");
    }

    #[test]
    fn test_init_is_once_per_process() {
        let config = TracingConfig::new().with_default_directive("stagecraft=debug");
        assert!(init_tracing(&config).is_ok());
        assert!(matches!(init_tracing(&config), Err(StagecraftError::Tracing(_))));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = TracingConfig::new().with_default_directive("=nope=");
        assert!(matches!(init_tracing(&config), Err(StagecraftError::Config(_))));
    }
}
