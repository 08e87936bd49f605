use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::block::{sun2000_blocks, BlockError, BlockTable, RegisterBlock};
use crate::timing::Timing;

/// Errors raised while loading the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON5 or does not match the schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    /// A value is out of range
    #[error("validation error: {0}")]
    Validation(String),
    /// The block table is inconsistent
    #[error("invalid block table: {0}")]
    Blocks(#[from] BlockError),
}

/// Complete proxy configuration
///
/// Every section is optional in the file and falls back to its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Upstream device
    pub device: DeviceConfig,
    /// Local Modbus TCP server
    pub proxy: ServerConfig,
    /// Pacing of upstream traffic
    pub timing: TimingConfig,
    /// Register blocks mirrored from the device, polled in this order
    pub blocks: Vec<RegisterBlock>,
    /// Logging
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            proxy: ServerConfig::default(),
            timing: TimingConfig::default(),
            blocks: sun2000_blocks(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Address of the upstream Modbus TCP device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// IP address or host name
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Unit id used in every upstream request
    pub unit_id: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.178.192".to_string(),
            port: 502,
            unit_id: 1,
        }
    }
}

/// Local Modbus TCP server exposed to home-automation clients
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address the server listens on
    pub listen: SocketAddr,
    /// Unit id the server answers to
    pub unit_id: u8,
    /// Number of holding registers, addresses `0..register_count`
    pub register_count: usize,
    /// Maximum number of concurrent client sessions
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 502)),
            unit_id: 1,
            register_count: 220,
            max_sessions: 4,
        }
    }
}

/// Timing section of the file, all values in milliseconds
///
/// Cooldowns after individual outcomes are not configurable and keep the values of
/// [`Timing::default`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Gap between two upstream transactions
    pub poll_gap_ms: u64,
    /// Age after which an outstanding transaction is abandoned
    pub request_timeout_ms: u64,
    /// Delay between connection attempts
    pub reconnect_delay_ms: u64,
    /// Quiet period after a connect
    pub grace_period_ms: u64,
    /// Response timeout of a single Modbus request
    pub response_timeout_ms: u64,
    /// Period of the gateway tick
    pub tick_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_gap_ms: 2000,
            request_timeout_ms: 10_000,
            reconnect_delay_ms: 10_000,
            grace_period_ms: 5000,
            response_timeout_ms: 5000,
            tick_ms: 10,
        }
    }
}

impl TimingConfig {
    /// Timing parameters of the gateway
    pub fn to_timing(&self) -> Timing {
        Timing {
            poll_gap: Duration::from_millis(self.poll_gap_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
            ..Timing::default()
        }
    }

    /// Response timeout passed to the Modbus client
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Tick period of the gateway task
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn" or "error"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ProxyConfig {
    /// Load and validate a JSON5 configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse and validate JSON5 text
    pub fn from_json5(text: &str) -> Result<Self, ConfigError> {
        let config: ProxyConfig = json5::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and the block table
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.is_empty() {
            return Err(ConfigError::Validation(
                "device host cannot be empty".to_string(),
            ));
        }

        if self.proxy.register_count == 0 || self.proxy.register_count > 0x10000 {
            return Err(ConfigError::Validation(format!(
                "register_count must be 1-65536, got {}",
                self.proxy.register_count
            )));
        }

        if self.proxy.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "max_sessions must be at least 1".to_string(),
            ));
        }

        if self.timing.tick_ms == 0 {
            return Err(ConfigError::Validation(
                "tick_ms must be at least 1".to_string(),
            ));
        }

        if self.timing.response_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "response_timeout_ms must be at least 1".to_string(),
            ));
        }

        if self.timing.response_timeout_ms >= self.timing.request_timeout_ms {
            return Err(ConfigError::Validation(format!(
                "response_timeout_ms ({}) must be below request_timeout_ms ({})",
                self.timing.response_timeout_ms, self.timing.request_timeout_ms
            )));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log level '{}' (use one of {})",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        self.block_table()?;
        Ok(())
    }

    /// Validated block table sized for the configured register store
    pub fn block_table(&self) -> Result<BlockTable, BlockError> {
        BlockTable::new(self.blocks.clone(), self.proxy.register_count)
    }
}
