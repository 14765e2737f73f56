//! # squabble-core
//!
//! Protocol engine shared by the squabble client and server.
//!
//! This crate provides:
//! - A stream abstraction over plain TCP, TLS and in-memory pipes
//! - NUL-framed transport with idle timeout and half-close
//! - The staged command pipeline (PARSE, LOG, ACTION)
//! - Connection endpoints with settlement subscriptions and lifecycle events
//! - PEM certificate and key loading

pub mod endpoint;
pub mod engine;
pub mod error;
pub mod pem;
pub mod stage;
pub mod stream;
pub mod transport;

pub use endpoint::{ConnectionEvent, Endpoint, Settlements};
pub use engine::{base_stages, drive, handle_command, process_command, Peer};
pub use error::{CoreError, HandlerError, TransportError};
pub use stage::{typed, Flow, Handler, HandlerFuture, Outcome, Stage, StageTable};
pub use stream::NetStream;
pub use transport::{Transport, TransportEvent, TransportReader, OUTBOUND_QUEUE_CAPACITY};
