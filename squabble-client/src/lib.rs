//! # squabble-client
//!
//! Client library for squabble.
//!
//! This crate provides:
//! - Async client with version exchange and authentication handshake
//! - Chat message send and a stream of received messages
//! - Automatic keepalive on idle connections
//! - Optional TLS support

pub mod client;
pub mod config;
pub mod error;
mod keepalive;
pub mod tls;

pub use client::{ChatMessage, Client};
pub use config::{Authentication, ClientConfig, TlsClientConfig};
pub use error::ClientError;
