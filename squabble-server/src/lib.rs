//! # squabble-server
//!
//! Chat server for squabble.
//!
//! This crate provides:
//! - The server side connection state machine (handshake, authentication,
//!   message send)
//! - Lazily created channels with broadcast to every connected client
//! - Pluggable anonymous and token authenticators
//! - YAML and environment configuration
//! - Optional TLS support

pub mod auth;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod state;
pub mod tls;

pub use auth::{
    AnonymousAuthenticator, AuthMethod, Authenticator, Authenticators, TokenAuthenticator, User,
};
pub use channel::{AcceptAll, Channel, ChannelMessage, ChannelNamePolicy, ChannelRegistry};
pub use config::{AuthConfig, ChannelsConfig, Config, ConfigError, NetworkConfig, TlsConfig};
pub use connection::ServerConnection;
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats};
pub use state::ServerState;
