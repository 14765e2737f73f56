//! Client configuration.

use crate::error::ClientError;
use squabble_protocol::code;
use std::path::PathBuf;
use std::time::Duration;

/// Application name sent in VERSION unless configured otherwise.
pub const DEFAULT_APP_NAME: &str = "squabble-client";

/// Handle requested by anonymous clients unless configured otherwise.
pub const DEFAULT_HANDLE: &str = "squabble-user";

/// Default interval between keepalives on an otherwise silent connection.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(600);

/// How the client identifies itself after the version exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Anonymous { handle: String },
    Token { token: String },
}

impl Authentication {
    pub fn anonymous(handle: impl Into<String>) -> Self {
        Authentication::Anonymous {
            handle: handle.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Authentication::Token {
            token: token.into(),
        }
    }

    /// Builds an authentication method from its name (`anonymous` or
    /// `token`) and credential.
    pub fn from_kind(kind: &str, value: Option<&str>) -> Result<Self, ClientError> {
        match kind {
            "anonymous" => Ok(Self::anonymous(value.unwrap_or(DEFAULT_HANDLE))),
            "token" => value.map(Self::token).ok_or_else(|| {
                ClientError::Configuration("token authentication requires a token".into())
            }),
            other => Err(ClientError::Configuration(format!(
                "no authentication method '{}'",
                other
            ))),
        }
    }

    /// The command code and credential sent to authenticate.
    pub(crate) fn command(&self) -> (&'static str, &str) {
        match self {
            Authentication::Anonymous { handle } => (code::AUTH_WITH_ANONYMOUS, handle),
            Authentication::Token { token } => (code::AUTH_WITH_TOKEN, token),
        }
    }
}

impl Default for Authentication {
    fn default() -> Self {
        Self::anonymous(DEFAULT_HANDLE)
    }
}

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web PKI roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the host connected to).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application name sent in VERSION.
    pub app_name: String,
    /// Authentication method used after the version exchange.
    pub authentication: Authentication,
    /// Silence after which a keepalive is sent.
    pub keepalive_interval: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the version exchange and authentication.
    pub handshake_timeout: Duration,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            authentication: Authentication::default(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            tls: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }
}
