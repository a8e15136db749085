//! Configuration management for RemoteStash
//!
//! This module handles loading, validating, and managing configuration
//! for the RemoteStash server and command line client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "REMOTESTASH_CONFIG";

/// Longest DNS-SD instance label
const MAX_NAME_LEN: usize = 63;

const MIN_BODY_SIZE: usize = 1024;
const MAX_BODY_SIZE: usize = 1024 * 1024 * 1024;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to write TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name advertised for mDNS discovery
    #[serde(default = "default_name")]
    pub name: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

/// Discovery and listening settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface whose addresses are advertised; defaults to the first
    /// non-loopback interface with an ipv4 address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Fixed listening port; absent or 0 picks an ephemeral port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Publish the mDNS record when serving
    #[serde(default = "default_advertise")]
    pub advertise: bool,

    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,

    /// How long one-shot commands browse for a peer
    #[serde(default = "default_browse_timeout")]
    pub browse_timeout_secs: u64,
}

/// TLS identity files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_certificate")]
    pub certificate: PathBuf,

    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,

    /// Certificate clients pin; defaults to `certificate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_certificate: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Largest accepted push body in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_name() -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let host = host.split('.').next().unwrap_or_default();
    let name = if host.is_empty() {
        "RemoteStash".to_string()
    } else {
        format!("{} RemoteStash", host)
    };
    truncate_label(name)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_advertise() -> bool {
    true
}

fn default_resolve_timeout() -> u64 {
    5
}

fn default_browse_timeout() -> u64 {
    3
}

fn default_certificate() -> PathBuf {
    PathBuf::from("~/.config/remotestash/remotestash-cert.pem")
}

fn default_private_key() -> PathBuf {
    PathBuf::from("~/.config/remotestash/remotestash-key.pem")
}

fn default_max_body_size() -> usize {
    crate::transport::DEFAULT_MAX_BODY_SIZE
}

fn default_request_timeout() -> u64 {
    30
}

/// Cut a name down to the instance label limit on a char boundary
fn truncate_label(mut name: String) -> String {
    while name.len() > MAX_NAME_LEN {
        name.pop();
    }
    name
}

// Default implementations
impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            port: None,
            advertise: default_advertise(),
            resolve_timeout_secs: default_resolve_timeout(),
            browse_timeout_secs: default_browse_timeout(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            certificate: default_certificate(),
            private_key: default_private_key(),
            pinned_certificate: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            network: NetworkConfig::default(),
            tls: TlsConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from REMOTESTASH_CONFIG environment variable
    /// 2. ~/.config/remotestash/config.toml
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Self::default();
                config.expand_paths();
                Ok(config)
            }
        }
    }

    /// Load configuration with an optional explicit path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate_config()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remotestash").join("config.toml"))
    }

    /// Find configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    /// Expand tilde in paths
    fn expand_paths(&mut self) {
        self.tls.certificate = expand_path(&self.tls.certificate);
        self.tls.private_key = expand_path(&self.tls.private_key);
        self.tls.pinned_certificate = self.tls.pinned_certificate.as_deref().map(expand_path);
    }

    /// Validate configuration values
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("name must not be empty".to_string()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(ConfigError::Validation(format!(
                "name must not exceed {} bytes",
                MAX_NAME_LEN
            )));
        }

        if self.server.max_body_size < MIN_BODY_SIZE {
            return Err(ConfigError::Validation(
                "max_body_size must be at least 1024 bytes (1KB)".to_string(),
            ));
        }
        if self.server.max_body_size > MAX_BODY_SIZE {
            return Err(ConfigError::Validation(
                "max_body_size must not exceed 1073741824 bytes (1GB)".to_string(),
            ));
        }

        if self.network.resolve_timeout_secs == 0
            || self.network.browse_timeout_secs == 0
            || self.client.request_timeout_secs == 0
        {
            return Err(ConfigError::Validation(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Listening port override, if any
    pub fn port(&self) -> Option<u16> {
        self.network.port.filter(|port| *port != 0)
    }

    /// Certificate that clients pin
    pub fn pinned_certificate(&self) -> &Path {
        self.tls
            .pinned_certificate
            .as_deref()
            .unwrap_or(&self.tls.certificate)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.network.resolve_timeout_secs)
    }

    pub fn browse_timeout(&self) -> Duration {
        Duration::from_secs(self.network.browse_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }

    /// Save configuration to a path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Write the commented example file
    pub fn write_example(path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::generate_example())?;
        Ok(())
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();

        format!(
            r#"# RemoteStash Configuration File
# Location: ~/.config/remotestash/config.toml

# Name other devices see when browsing
name = "{}"

# Logging level (trace, debug, info, warn, error)
log_level = "{}"

[network]
# Interface whose addresses are advertised (default: first LAN interface)
# interface = "en0"
# Fixed listening port (default: ephemeral)
# port = 0
# Publish this device over mDNS when serving
advertise = {}
# Seconds allowed for one peer to resolve
resolve_timeout_secs = {}
# Seconds one-shot commands wait for a peer
browse_timeout_secs = {}

[tls]
# Certificate and key shared by every device
certificate = "{}"
private_key = "{}"
# Certificate to pin when connecting (default: certificate)
# pinned_certificate = "~/.config/remotestash/remotestash-cert.pem"

[server]
# Largest accepted push in bytes (50MB default)
max_body_size = {}

[client]
request_timeout_secs = {}
"#,
            config.name.replace('"', "'"),
            config.log_level,
            config.network.advertise,
            config.network.resolve_timeout_secs,
            config.network.browse_timeout_secs,
            config.tls.certificate.display(),
            config.tls.private_key.display(),
            config.server.max_body_size,
            config.client.request_timeout_secs,
        )
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}
