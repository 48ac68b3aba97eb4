//! Structured tracing initialization.
//!
//! Uses the `tracing` and `tracing-subscriber` crates to provide structured,
//! async-aware logging with environment-based filtering and multiple output
//! formats. The log level comes from the relay configuration and can be
//! overridden at runtime with `RUST_LOG`.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-oriented format with colors (for development).
    Pretty,
    /// Compact format without extra decoration (for production).
    Compact,
    /// JSON format for log aggregation.
    Json,
}

/// Tracing configuration options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level applied when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Whether to enable ANSI colors (Pretty format only).
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create a tracing config at the given level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Derive a tracing config from the relay configuration.
    pub fn from_relay_config(config: &RelayConfig) -> RelayResult<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Parse a configuration log level string.
pub fn parse_log_level(level: &str) -> RelayResult<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(RelayError::ConfigValidation(format!(
            "invalid log level '{}'",
            other
        ))),
    }
}

/// Install the global tracing subscriber.
///
/// Returns an error if a subscriber is already installed, which keeps
/// repeated initialization (e.g. in tests) harmless.
pub fn init(config: TracingConfig) -> RelayResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        OutputFormat::Pretty => registry
            .with(fmt::layer().with_ansi(config.with_ansi))
            .try_init(),
        OutputFormat::Compact => registry
            .with(fmt::layer().compact().with_ansi(false))
            .try_init(),
        OutputFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
    .map_err(|error| RelayError::ConfigValidation(error.to_string()))
}

/// Initialize from the relay configuration.
pub fn init_from_config(config: &RelayConfig) -> RelayResult<()> {
    init(TracingConfig::from_relay_config(config)?)
}
