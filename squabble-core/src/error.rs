//! Core error types.

use squabble_protocol::{ProtocolError, TerminateReason};
use thiserror::Error;

/// Errors from the byte-stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket closed")]
    SocketClosed,

    #[error("outbound queue full")]
    Backlogged,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns the reason sent to the peer when this error ends a connection.
    pub fn terminate_reason(&self) -> TerminateReason {
        match self {
            TransportError::Protocol(ProtocolError::FrameTooLarge { .. }) => {
                TerminateReason::BadLength
            }
            TransportError::Backlogged => TerminateReason::Backlogged,
            _ => TerminateReason::InternalError,
        }
    }
}

/// Errors from the protocol engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection ended")]
    ConnectionEnded,

    #[error("TLS error: {0}")]
    Tls(String),
}

impl CoreError {
    /// Returns whether the underlying stream is gone.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            CoreError::ConnectionEnded | CoreError::Transport(TransportError::SocketClosed)
        )
    }
}

/// Errors returned by stage handlers.
///
/// Any handler error terminates the connection with `internal-error`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

impl From<TransportError> for HandlerError {
    fn from(err: TransportError) -> Self {
        HandlerError::Core(CoreError::Transport(err))
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(err: ProtocolError) -> Self {
        HandlerError::Core(CoreError::Protocol(err))
    }
}
