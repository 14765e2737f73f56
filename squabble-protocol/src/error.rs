//! Protocol error types and termination reasons.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or command construction.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid command code '{code}': {reason}")]
    InvalidCommandCode { code: String, reason: String },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("command contains the frame delimiter")]
    EmbeddedDelimiter,

    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,
}

/// Machine-readable reasons carried by a CONNECTION_TERMINATE command.
///
/// These strings are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminateReason {
    /// A command was sent that is not allowed in the current state.
    BadCommand,
    /// Authentication was refused.
    BadAuth,
    /// An unauthenticated peer sent an oversized command.
    BadLength,
    /// The peer speaks a different protocol version.
    BadVersion,
    /// A handler failed while processing a command.
    InternalError,
    /// The local side is shutting down.
    Quitting,
    /// The connection was idle for too long.
    Timeout,
    /// The peer stopped reading and its outbound queue filled up.
    Backlogged,
    /// The server is at its connection limit.
    ServerFull,
}

impl TerminateReason {
    /// Returns the wire representation of this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::BadCommand => "bad-command",
            TerminateReason::BadAuth => "bad-auth",
            TerminateReason::BadLength => "bad-length",
            TerminateReason::BadVersion => "bad-version",
            TerminateReason::InternalError => "internal-error",
            TerminateReason::Quitting => "quitting",
            TerminateReason::Timeout => "timeout",
            TerminateReason::Backlogged => "backlogged",
            TerminateReason::ServerFull => "server-full",
        }
    }

    /// Parses a reason received from the wire.
    pub fn from_wire(reason: &str) -> Option<Self> {
        match reason {
            "bad-command" => Some(TerminateReason::BadCommand),
            "bad-auth" => Some(TerminateReason::BadAuth),
            "bad-length" => Some(TerminateReason::BadLength),
            "bad-version" => Some(TerminateReason::BadVersion),
            "internal-error" => Some(TerminateReason::InternalError),
            "quitting" => Some(TerminateReason::Quitting),
            "timeout" => Some(TerminateReason::Timeout),
            "backlogged" => Some(TerminateReason::Backlogged),
            "server-full" => Some(TerminateReason::ServerFull),
            _ => None,
        }
    }

    /// Returns whether reconnecting after this reason may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TerminateReason::InternalError
                | TerminateReason::Quitting
                | TerminateReason::Timeout
                | TerminateReason::Backlogged
                | TerminateReason::ServerFull
        )
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
