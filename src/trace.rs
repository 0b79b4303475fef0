//! Structured logging infrastructure.
//!
//! Uses `tracing` and `tracing-subscriber` for async-aware structured
//! logging with environment-based filtering and pretty, compact, or JSON
//! output. The configured log level is the default; `RUST_LOG` overrides it
//! when set.

use crate::error::{AgentError, AgentResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    #[default]
    Pretty,
    /// Compact format without colors (for production)
    Compact,
    /// JSON format for structured logging (for log aggregation)
    Json,
}

/// Tracing configuration options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: String,
    pub format: OutputFormat,
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: impl Into<String>) -> Self {
        TracingConfig {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init(config: &TracingConfig) -> AgentResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .with_ansi(config.with_ansi)
            .with_thread_names(true)
            .boxed(),
        OutputFormat::Compact => fmt::layer().with_ansi(false).compact().boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| AgentError::Configuration(format!("tracing init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_chains() {
        let config = TracingConfig::new("debug")
            .with_format(OutputFormat::Json)
            .with_ansi(false);
        assert_eq!(config.level, "debug");
        assert!(!config.with_ansi);
        assert!(matches!(config.format, OutputFormat::Json));
    }
}
