//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SQUABBLE_CONFIG)
//! 3. Environment variables

use crate::auth::{AnonymousAuthenticator, Authenticators, TokenAuthenticator};
use crate::server::{ServerConfig, DEFAULT_APP_NAME};
use serde::{Deserialize, Serialize};
use squabble_core::OUTBOUND_QUEUE_CAPACITY;
use squabble_protocol::DEFAULT_PORT;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Handle given to anonymous clients that do not ask for one.
pub const DEFAULT_HANDLE: &str = "squabble-user";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name sent to clients in VERSION.
    pub app_name: String,
    /// Network configuration.
    pub network: NetworkConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Channel configuration.
    pub channels: ChannelsConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            network: NetworkConfig::default(),
            auth: AuthConfig::default(),
            channels: ChannelsConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SQUABBLE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("SQUABBLE_APP_NAME") {
            if !name.is_empty() {
                self.app_name = name;
            }
        }
        self.network.apply_env_overrides();
        self.auth.apply_env_overrides();
        self.channels.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Loads token entries from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        self.auth.load_secrets()
    }

    /// Returns the runtime server configuration, without TLS.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.network.bind_addr)
            .with_app_name(self.app_name.clone())
            .with_idle_timeout(self.network.idle_timeout())
            .with_max_connections(self.network.max_connections)
            .with_outbound_queue_capacity(self.network.outbound_queue_capacity)
            .with_create_on_join(self.channels.create_on_join)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds (0 disables it).
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frames a client may have waiting to be written before it is
    /// disconnected.
    pub outbound_queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 900,
            max_connections: 1000,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("SQUABBLE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("SQUABBLE_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("SQUABBLE_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(capacity) = std::env::var("SQUABBLE_OUTBOUND_QUEUE") {
            if let Ok(n) = capacity.parse() {
                self.outbound_queue_capacity = n;
            }
        }
    }

    /// Returns the idle timeout, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// A token accepted by the token authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    /// SHA-256 hex hash of the token.
    pub hash: String,
    /// Handle of the user the token authenticates as.
    pub handle: String,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether anonymous authentication is offered.
    pub anonymous: bool,
    /// Handle for anonymous clients that do not ask for one.
    pub default_handle: String,
    /// Accepted tokens.
    pub tokens: Vec<TokenEntry>,
    /// Optional path to a file of `<hash> <handle>` lines.
    pub secrets_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous: true,
            default_handle: DEFAULT_HANDLE.to_string(),
            tokens: Vec::new(),
            secrets_file: None,
        }
    }
}

impl AuthConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(anonymous) = std::env::var("SQUABBLE_AUTH_ANONYMOUS") {
            self.anonymous = anonymous == "1" || anonymous.to_lowercase() == "true";
        }

        if let Ok(handle) = std::env::var("SQUABBLE_AUTH_DEFAULT_HANDLE") {
            if !handle.is_empty() {
                self.default_handle = handle;
            }
        }

        if let Ok(token) = std::env::var("SQUABBLE_AUTH_TOKEN") {
            if let Some(entry) = parse_token_line(&token) {
                self.tokens.push(entry);
            }
        }

        if let Ok(path) = std::env::var("SQUABBLE_AUTH_SECRETS_FILE") {
            self.secrets_file = Some(PathBuf::from(path));
        }
    }

    /// Loads token entries from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        let Some(ref path) = self.secrets_file else {
            return Ok(());
        };
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.clone(), e))?;

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = parse_token_line(line).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{}:{}: expected '<hash> <handle>'",
                    path.display(),
                    number + 1
                ))
            })?;
            self.tokens.push(entry);
        }
        Ok(())
    }

    /// Builds the authenticators this configuration describes.
    pub fn authenticators(&self) -> Authenticators {
        let mut authenticators = Authenticators::new();
        if self.anonymous {
            authenticators =
                authenticators.with_anonymous(AnonymousAuthenticator::new(self.default_handle.clone()));
        }
        if !self.tokens.is_empty() {
            authenticators = authenticators.with_token(TokenAuthenticator::new(
                self.tokens
                    .iter()
                    .map(|entry| (entry.hash.clone(), entry.handle.clone())),
            ));
        }
        authenticators
    }
}

fn parse_token_line(line: &str) -> Option<TokenEntry> {
    let mut parts = line.split_whitespace();
    let hash = parts.next()?;
    let handle = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(TokenEntry {
        hash: hash.to_string(),
        handle: handle.to_string(),
    })
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Create channels the first time they are referenced.
    pub create_on_join: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            create_on_join: true,
        }
    }
}

impl ChannelsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(create) = std::env::var("SQUABBLE_CREATE_ON_JOIN") {
            self.create_on_join = create == "1" || create.to_lowercase() == "true";
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded server certificate file.
    pub cert_path: Option<PathBuf>,
    /// Path to PEM-encoded private key file.
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("SQUABBLE_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("SQUABBLE_TLS_CERT") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("SQUABBLE_TLS_KEY") {
            self.key_path = Some(PathBuf::from(path));
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.cert_path.is_none() {
            return Err(ConfigError::Validation(
                "TLS enabled but cert_path not set".to_string(),
            ));
        }
        if self.key_path.is_none() {
            return Err(ConfigError::Validation(
                "TLS enabled but key_path not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
