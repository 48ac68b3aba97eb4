//! Strongly-typed relay configuration.
//!
//! Configuration is loaded with figment from:
//! 1. a TOML file (default `config/relay.toml`)
//! 2. environment variables prefixed with `DRONE_RELAY_` (nested keys
//!    separated by `__`, e.g. `DRONE_RELAY_BATTERY__INITIAL_LEVEL=80`)
//!
//! Every tunable has a default, so an empty file (or no file at all) yields
//! a runnable configuration. `validate()` performs the semantic checks that
//! parsing cannot: address syntax, threshold sanity, non-zero periods.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};
use crate::validation;

/// Default configuration file path relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Application-level settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Ingestion listener settings.
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Aggregation cycle settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// Battery simulation settings.
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Forwarding relay settings.
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Relay identifier stamped into every batch.
    #[serde(default = "default_drone_id")]
    pub drone_id: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ingestion listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address sensors connect to. Port 0 binds an ephemeral port.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Per-connection read timeout; bounds how long shutdown or rebind can
    /// be delayed by an idle connection.
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

/// Aggregation cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Time between aggregation cycles.
    #[serde(with = "humantime_serde", default = "default_aggregation_period")]
    pub period: Duration,
    /// Most-recent-N readings retained per sensor.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Temperature strictly above this value is anomalous.
    #[serde(default = "default_temperature_high")]
    pub temperature_high: f64,
    /// Humidity strictly below this value is anomalous.
    #[serde(default = "default_humidity_low")]
    pub humidity_low: f64,
    /// How long reported anomaly keys are retained for deduplication.
    #[serde(with = "humantime_serde", default = "default_dedup_retention")]
    pub dedup_retention: Duration,
}

/// Battery simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Starting battery level, 0-100.
    #[serde(default = "default_initial_level")]
    pub initial_level: u8,
    /// Time between automatic drain steps of one level.
    #[serde(with = "humantime_serde", default = "default_drain_interval")]
    pub drain_interval: Duration,
    /// At or below this level the relay enters return-to-base mode.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: u8,
}

/// Forwarding relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Collector address batches are delivered to.
    #[serde(default = "default_collector_addr")]
    pub collector_addr: String,
    /// Time between attempts to flush the outgoing queue.
    #[serde(with = "humantime_serde", default = "default_forward_drain_interval")]
    pub drain_interval: Duration,
    /// Bound on establishing a collector connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Bound on writing one batch.
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,
}

fn default_drone_id() -> String {
    "drone-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:5050".to_string()
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_aggregation_period() -> Duration {
    Duration::from_secs(10)
}

fn default_buffer_capacity() -> usize {
    5
}

fn default_temperature_high() -> f64 {
    50.0
}

fn default_humidity_low() -> f64 {
    10.0
}

fn default_dedup_retention() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_initial_level() -> u8 {
    100
}

fn default_drain_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_low_threshold() -> u8 {
    20
}

fn default_collector_addr() -> String {
    "127.0.0.1:6000".to_string()
}

fn default_forward_drain_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            drone_id: default_drone_id(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            period: default_aggregation_period(),
            buffer_capacity: default_buffer_capacity(),
            temperature_high: default_temperature_high(),
            humidity_low: default_humidity_low(),
            dedup_retention: default_dedup_retention(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            initial_level: default_initial_level(),
            drain_interval: default_drain_interval(),
            low_threshold: default_low_threshold(),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            collector_addr: default_collector_addr(),
            drain_interval: default_forward_drain_interval(),
            connect_timeout: default_connect_timeout(),
            write_timeout: default_write_timeout(),
        }
    }
}

impl RelayConfig {
    /// Load from the default file path and the environment.
    pub fn load() -> RelayResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path, merged with `DRONE_RELAY_`
    /// environment variables. A missing file falls back to defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RelayResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DRONE_RELAY_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// The parsed listener bind address. Port 0 is allowed here (it binds
    /// an ephemeral port); runtime rebind requests are stricter.
    pub fn bind_addr(&self) -> RelayResult<SocketAddr> {
        self.listener
            .bind_addr
            .parse()
            .map_err(|_| invalid(format!("invalid listener address '{}'", self.listener.bind_addr)))
    }

    /// The parsed collector address.
    pub fn collector_addr(&self) -> RelayResult<SocketAddr> {
        validation::parse_reconfig_addr(&self.forwarder.collector_addr).map_err(|reason| {
            invalid(format!(
                "invalid collector address '{}': {}",
                self.forwarder.collector_addr, reason
            ))
        })
    }

    /// Semantic validation after loading. Returns the first violation.
    pub fn validate(&self) -> RelayResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(invalid(format!(
                "invalid log_level '{}', must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.application.drone_id.is_empty() {
            return Err(invalid("drone_id must not be empty".to_string()));
        }

        self.bind_addr()?;
        self.collector_addr()?;

        if self.aggregator.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity must be at least 1".to_string()));
        }
        validation::is_finite(self.aggregator.temperature_high)
            .map_err(|reason| invalid(format!("temperature_high: {}", reason)))?;
        validation::is_finite(self.aggregator.humidity_low)
            .map_err(|reason| invalid(format!("humidity_low: {}", reason)))?;

        if self.battery.initial_level > 100 {
            return Err(invalid(format!(
                "battery initial_level {} is out of range (0-100)",
                self.battery.initial_level
            )));
        }
        if self.battery.low_threshold > 100 {
            return Err(invalid(format!(
                "battery low_threshold {} is out of range (0-100)",
                self.battery.low_threshold
            )));
        }

        for (name, duration) in [
            ("listener.read_timeout", self.listener.read_timeout),
            ("aggregator.period", self.aggregator.period),
            ("battery.drain_interval", self.battery.drain_interval),
            ("forwarder.drain_interval", self.forwarder.drain_interval),
            ("forwarder.connect_timeout", self.forwarder.connect_timeout),
            ("forwarder.write_timeout", self.forwarder.write_timeout),
        ] {
            if duration.is_zero() {
                return Err(invalid(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }
}

fn invalid(reason: String) -> RelayError {
    RelayError::ConfigValidation(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.aggregator.buffer_capacity, 5);
        assert_eq!(config.aggregator.period, Duration::from_secs(10));
        assert_eq!(config.battery.low_threshold, 20);
        assert_eq!(config.battery.drain_interval, Duration::from_secs(5));
        assert_eq!(config.aggregator.temperature_high, 50.0);
        assert_eq!(config.aggregator.humidity_low, 10.0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RelayConfig::load_from("/nonexistent/relay.toml").unwrap();
        assert_eq!(config.application.drone_id, "drone-1");
    }

    #[test]
    fn zero_buffer_capacity_is_rejected() {
        let mut config = RelayConfig::default();
        config.aggregator.buffer_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = RelayConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn collector_port_zero_is_rejected() {
        let mut config = RelayConfig::default();
        config.forwarder.collector_addr = "127.0.0.1:0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn listener_may_use_an_ephemeral_port() {
        let mut config = RelayConfig::default();
        config.listener.bind_addr = "127.0.0.1:0".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn battery_level_above_100_is_rejected() {
        let mut config = RelayConfig::default();
        config.battery.initial_level = 150;
        assert!(config.validate().is_err());
    }
}
