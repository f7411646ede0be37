//! TOML Configuration File Support
//!
//! Centralized configuration loading for the hub, with an optional TOML file
//! at `~/.config/notify-hub/hub.toml` (or wherever `NOTIFY_HUB_CONFIG` points).
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Environment Variables
//!
//! | Variable            | Field              | Default   |
//! |---------------------|--------------------|-----------|
//! | `BIND_ADDR`         | `bind_addr`        | `0.0.0.0` |
//! | `PORT`              | `port`             | `50051`   |
//! | `HTTP_PORT`         | `http_port`        | `8080`    |
//! | `X_API_KEY`         | `api_key`          | unset     |
//! | `NOTIFY_HUB_CONFIG` | config file path   | XDG path  |
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1"
//! port = 50051
//! http_port = 8080
//! max_connections = 1024
//!
//! [auth]
//! api_key = "change-me"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "NOTIFY_HUB_CONFIG";

/// Default wire service port
pub const DEFAULT_PORT: u16 = 50051;

/// Default HTTP bridge port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Default cap on concurrent wire connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address both listeners bind to
    pub bind_addr: Option<String>,

    /// Wire service port
    pub port: Option<u16>,

    /// HTTP bridge port
    pub http_port: Option<u16>,

    /// Maximum concurrent wire connections
    pub max_connections: Option<usize>,
}

/// Auth section of the TOML configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthToml {
    /// Shared secret for the HTTP bridge
    pub api_key: Option<String>,
}

impl std::fmt::Debug for AuthToml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToml")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubToml {
    /// Server section
    pub server: ServerToml,

    /// Auth section
    pub auth: AuthToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved hub configuration
#[derive(Clone)]
pub struct HubConfig {
    /// Address both listeners bind to
    pub bind_addr: IpAddr,

    /// Wire service port
    pub port: u16,

    /// HTTP bridge port
    pub http_port: u16,

    /// Maximum concurrent wire connections
    pub max_connections: usize,

    /// Shared secret for the HTTP bridge; `None` makes every HTTP request fail
    pub api_key: Option<String>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of the highest-priority value applied
    source: ConfigSource,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            http_port: DEFAULT_HTTP_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            api_key: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("http_port", &self.http_port)
            .field("max_connections", &self.max_connections)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("config_file_path", &self.config_file_path)
            .field("source", &self.source)
            .finish()
    }
}

impl HubConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Wire service listen address
    #[must_use]
    pub fn wire_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// HTTP bridge listen address
    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.http_port)
    }

    /// Check the resolved values are usable together
    ///
    /// A missing API key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if both listeners would share a
    /// port or `max_connections` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port != 0 && self.port == self.http_port {
            return Err(ConfigError::ValidationError(format!(
                "wire port and HTTP port must differ (both {})",
                self.port
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/notify-hub/hub.toml` or
/// `~/.config/notify-hub/hub.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("notify-hub").join("hub.toml"))
}

/// Load configuration from the process environment and config file
///
/// The file is taken from `NOTIFY_HUB_CONFIG` if set, else the default path.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<HubConfig, ConfigError> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .or_else(default_config_path);
    load_config_from_path(path)
}

/// Load configuration from a specific path plus the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<HubConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// `env` maps a variable name to its value, if set.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or holds an
/// invalid bind address.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<HubConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = HubConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: HubToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn parse_bind_addr(value: &str) -> Result<IpAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("invalid bind address: {value}")))
}

fn apply_toml_config(config: &mut HubConfig, toml: &HubToml) -> Result<(), ConfigError> {
    if let Some(ref addr) = toml.server.bind_addr {
        config.bind_addr = parse_bind_addr(addr)?;
    }
    if let Some(port) = toml.server.port {
        config.port = port;
    }
    if let Some(port) = toml.server.http_port {
        config.http_port = port;
    }
    if let Some(max) = toml.server.max_connections {
        config.max_connections = max;
    }
    if let Some(ref key) = toml.auth.api_key {
        if !key.is_empty() {
            config.api_key = Some(key.clone());
        }
    }
    Ok(())
}

/// Unparseable values are ignored with a warning, leaving the lower layer
fn apply_env_config<F>(config: &mut HubConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = env("BIND_ADDR") {
        match parse_bind_addr(&addr) {
            Ok(ip) => {
                config.bind_addr = ip;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring BIND_ADDR"),
        }
    }
    if let Some(port) = env("PORT") {
        match port.trim_start_matches(':').parse::<u16>() {
            Ok(p) => {
                config.port = p;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %port, "Ignoring unparseable PORT"),
        }
    }
    if let Some(port) = env("HTTP_PORT") {
        match port.trim_start_matches(':').parse::<u16>() {
            Ok(p) => {
                config.http_port = p;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %port, "Ignoring unparseable HTTP_PORT"),
        }
    }
    if let Some(key) = env("X_API_KEY") {
        if !key.is_empty() {
            config.api_key = Some(key);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// CLI overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Bind address override
    pub bind_addr: Option<IpAddr>,

    /// Wire port override
    pub port: Option<u16>,

    /// HTTP port override
    pub http_port: Option<u16>,

    /// Connection cap override
    pub max_connections: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Set wire port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set HTTP port override
    #[must_use]
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Set connection cap override
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut HubConfig) {
        if self.bind_addr.is_some()
            || self.port.is_some()
            || self.http_port.is_some()
            || self.max_connections.is_some()
        {
            config.source = ConfigSource::Cli;
        }
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
