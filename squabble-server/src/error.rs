//! Server error types.

use crate::config::ConfigError;
use squabble_core::{CoreError, HandlerError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] squabble_protocol::ProtocolError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no such channel: {0}")]
    NoChannel(String),

    #[error("no {0} authenticator configured")]
    MissingAuthenticator(&'static str),

    #[error("server shutting down")]
    ShuttingDown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl From<ServerError> for HandlerError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Core(e) => HandlerError::Core(e),
            ServerError::MissingAuthenticator(_) => HandlerError::Configuration(err.to_string()),
            other => HandlerError::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_authenticator_is_configuration_error() {
        let err: HandlerError = ServerError::MissingAuthenticator("token").into();
        match err {
            HandlerError::Configuration(msg) => assert_eq!(msg, "no token authenticator configured"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_core_error_passes_through() {
        let err: HandlerError = ServerError::Core(CoreError::ConnectionEnded).into();
        assert!(matches!(err, HandlerError::Core(CoreError::ConnectionEnded)));
    }

    #[test]
    fn test_other_errors_are_boxed() {
        let err: HandlerError = ServerError::NoChannel("#x".into()).into();
        assert!(matches!(err, HandlerError::Other(_)));
        assert_eq!(err.to_string(), "no such channel: #x");
    }
}
