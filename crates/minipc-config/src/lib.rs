#![deny(unsafe_code)]

//! Configuration loading and validation for minipc.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central structure; every field has a default, so an empty file is a valid
//! configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Socket location and call timeouts, shared by servers and clients.
    #[serde(default)]
    pub link: LinkConfig,

    /// Settings of the sample server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Socket location and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Directory holding the server sockets.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// How long a client waits for a response.
    #[serde(default = "default_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Bound on a server's read or write of one client frame.
    #[serde(default = "default_timeout_ms")]
    pub client_io_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            call_timeout_ms: default_timeout_ms(),
            client_io_timeout_ms: default_timeout_ms(),
        }
    }
}

impl LinkConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn client_io_timeout(&self) -> Duration {
        Duration::from_millis(self.client_io_timeout_ms)
    }
}

fn default_base_dir() -> String {
    "/tmp/.minipc".to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Sample server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Link name; the socket lives at `<base_dir>/<name>`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// How long one server loop iteration waits for activity.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_server_name() -> String {
    "sample".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    500
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also mirror every link's diagnostic lines to stderr.
    #[serde(default)]
    pub trace_to_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            trace_to_stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Longest link name a socket path may use.
const MAX_NAME_LEN: usize = 20;

impl AppConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.base_dir.is_empty() {
            return Err(ConfigError::Validation(
                "link.base_dir must not be empty".to_string(),
            ));
        }
        if self.link.call_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "link.call_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.link.client_io_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "link.client_io_timeout_ms must be non-zero".to_string(),
            ));
        }

        let name = &self.server.name;
        if name.is_empty() || name.contains(['/', '\0']) {
            return Err(ConfigError::Validation(format!(
                "server.name must be a single path component, got {name:?}"
            )));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ConfigError::Validation(format!(
                "server.name must be at most {MAX_NAME_LEN} bytes, got {}",
                name.len()
            )));
        }
        if i32::try_from(self.server.poll_timeout_ms).is_err() {
            return Err(ConfigError::Validation(format!(
                "server.poll_timeout_ms must be at most {}, got {}",
                i32::MAX,
                self.server.poll_timeout_ms
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
