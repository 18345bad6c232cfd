//! Client configuration
//!
//! Plain settings for the broker endpoint, the connect sequence and the
//! inbound event queue, loaded from TOML. Every field has a default so an
//! empty file is a valid configuration.

use crate::observability::logging::{parse_level, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default connect timeout, matching the usual MQTT client default of 30s
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Broker endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// IP address or host name of the broker
    #[serde(default = "default_address")]
    pub address: String,
    /// Port where the broker accepts connections
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use a TLS connection
    #[serde(default)]
    pub encrypted: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            encrypted: false,
        }
    }
}

impl BrokerSection {
    /// Set the port from text, keeping the current port if it does not parse
    pub fn set_port_str(&mut self, port: &str) {
        if let Ok(parsed) = port.trim().parse::<u16>() {
            self.port = parsed;
        }
    }

    /// `address:port`, for log lines and error messages
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Connect sequence parameters and credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Delay before the connect sequence starts, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Handshake timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Start a connect sequence as soon as the client is created
    #[serde(default)]
    pub auto_connect: bool,
    /// Username; leave unset if the broker needs none
    pub username: Option<String>,
    /// Password; leave unset if the broker needs none
    pub password: Option<String>,
    /// Environment variable containing the username (takes precedence when set)
    pub username_env: Option<String>,
    /// Environment variable containing the password (takes precedence when set)
    pub password_env: Option<String>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            timeout_ms: default_timeout_ms(),
            keep_alive_secs: default_keep_alive_secs(),
            auto_connect: false,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
        }
    }
}

impl ConnectionSection {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Resolve `(username, password)`
    ///
    /// Environment indirection wins over the literal value when the variable
    /// is configured and present. Empty strings count as unset.
    pub fn credentials(&self) -> (Option<String>, Option<String>) {
        let username = resolve_secret(self.username_env.as_ref(), self.username.as_ref());
        let password = resolve_secret(self.password_env.as_ref(), self.password.as_ref());
        (username, password)
    }
}

/// Inbound event queue settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    /// Maximum number of undelivered messages held between ticks (0 = unbounded)
    #[serde(default)]
    pub capacity: usize,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Minimum level: error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Emit span open/close events
    #[serde(default)]
    pub spans: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            spans: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_delay_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn resolve_secret(env_name: Option<&String>, literal: Option<&String>) -> Option<String> {
    env_name
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| literal.cloned())
        .filter(|value| !value.is_empty())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.address.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.address must not be empty".to_string(),
            ));
        }

        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }

        if self.connection.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "connection.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if parse_level(&self.logging.level).is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "logging.level '{}' is not one of error, warn, info, debug, trace",
                self.logging.level
            )));
        }

        Ok(())
    }
}
