//! Client error types.

use squabble_core::CoreError;
use squabble_protocol::TerminateReason;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(CoreError),

    #[error("timeout")]
    Timeout,

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        if err.is_closed() {
            ClientError::ConnectionClosed
        } else {
            ClientError::Core(err)
        }
    }
}

impl ClientError {
    /// Returns whether reconnecting could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::Rejected(reason) => TerminateReason::from_wire(reason)
                .map(|r| r.is_retryable())
                .unwrap_or(false),
            _ => false,
        }
    }
}
