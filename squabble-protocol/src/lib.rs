//! # squabble-protocol
//!
//! Wire protocol implementation for squabble.
//!
//! This crate provides:
//! - The command grammar (`CODE <p1> <p2> ...`) with parameter escaping
//! - Schema-typed argument extraction
//! - NUL-delimited framing
//! - Command codes and termination reasons

pub mod args;
pub mod code;
pub mod command;
pub mod error;
pub mod frame;

pub use args::{parameters_to_arguments, ArgSpec, ArgType, ArgValue, Arguments};
pub use command::{
    create_command, escape_parameter, parse_parameters, validate_command_code, Command, Parameter,
};
pub use error::{ProtocolError, TerminateReason};
pub use frame::{encode_frame, FrameDecoder, FRAME_DELIMITER};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port for a squabble server.
pub const DEFAULT_PORT: u16 = 6767;

/// Maximum length of an outbound command code.
pub const COMMAND_CODE_LENGTH_MAX: usize = 32;

/// Maximum length (in characters) of a command accepted from an
/// unauthenticated peer.
pub const COMMAND_UNAUTHENTICATED_MAX_LENGTH: usize = 512;

/// Maximum size of a single frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
