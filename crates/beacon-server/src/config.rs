//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`$BEACON_CONFIG` or the default search paths)
//! - Environment variables (`BEACON_*`, `__` between nested keys)

use anyhow::{ensure, Context, Result};
use beacon_core::{ConnectionConfig, HubConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket endpoints.
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Keepalive timings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// WebSocket endpoint paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Path drivers connect to.
    #[serde(default = "default_publisher_path")]
    pub publisher_path: String,

    /// Path riders connect to.
    #[serde(default = "default_subscriber_path")]
    pub subscriber_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Hub event queue capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// How long to wait for any inbound frame, in milliseconds.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Deadline for a single write, in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_publisher_path() -> String {
    "/ws/driver".to_string()
}

fn default_subscriber_path() -> String {
    "/ws/rider".to_string()
}

fn default_max_message_size() -> usize {
    beacon_protocol::MAX_FRAME_SIZE
}

fn default_outbound_capacity() -> usize {
    beacon_core::outbox::DEFAULT_OUTBOUND_CAPACITY
}

fn default_event_capacity() -> usize {
    beacon_core::hub::DEFAULT_EVENT_CAPACITY
}

fn default_ping_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_pong_wait() -> u64 {
    60_000 // 60 seconds
}

fn default_write_wait() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tracking: TrackingConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            publisher_path: default_publisher_path(),
            subscriber_path: default_subscriber_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_capacity: default_outbound_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_wait_ms: default_pong_wait(),
            write_wait_ms: default_write_wait(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found (or defaults),
    /// then apply `BEACON_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, an
    /// override has the wrong type, or the result fails [`Config::validate`].
    pub fn load() -> Result<Self> {
        let base = match Self::find_file() {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        let config: Config = ::config::Config::builder()
            .add_source(
                ::config::Config::try_from(&base).context("Failed to load configuration")?,
            )
            .add_source(
                ::config::Environment::with_prefix("BEACON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("BEACON_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error if a heartbeat timing is zero, the ping interval is
    /// not shorter than the pong wait, or the message size limit is zero.
    pub fn validate(&self) -> Result<()> {
        let heartbeat = &self.heartbeat;
        ensure!(
            heartbeat.ping_interval_ms > 0,
            "heartbeat.ping_interval_ms must be greater than zero"
        );
        ensure!(
            heartbeat.pong_wait_ms > 0,
            "heartbeat.pong_wait_ms must be greater than zero"
        );
        ensure!(
            heartbeat.write_wait_ms > 0,
            "heartbeat.write_wait_ms must be greater than zero"
        );
        ensure!(
            heartbeat.ping_interval_ms < heartbeat.pong_wait_ms,
            "heartbeat.ping_interval_ms ({}) must be less than heartbeat.pong_wait_ms ({})",
            heartbeat.ping_interval_ms,
            heartbeat.pong_wait_ms
        );
        ensure!(
            self.limits.max_message_size > 0,
            "limits.max_message_size must be greater than zero"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Per-connection settings.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbound_capacity: self.limits.outbound_capacity,
            ping_interval: Duration::from_millis(self.heartbeat.ping_interval_ms),
            pong_wait: Duration::from_millis(self.heartbeat.pong_wait_ms),
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
            max_message_size: self.limits.max_message_size,
        }
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            event_capacity: self.limits.event_capacity,
        }
    }
}
