//! Shared server state: connected clients, channels and authenticators.

use crate::auth::{AuthMethod, Authenticators, User};
use crate::channel::{ChannelMessage, ChannelRegistry};
use crate::connection::ServerConnection;
use crate::error::ServerError;
use dashmap::DashMap;
use squabble_core::{CoreError, Peer, TransportError};
use squabble_protocol::{code, create_command, Parameter, TerminateReason};
use std::sync::Arc;
use uuid::Uuid;

/// State every connection of one server shares.
pub struct ServerState {
    app_name: String,
    authenticators: Authenticators,
    channels: ChannelRegistry,
    clients: DashMap<Uuid, Arc<ServerConnection>>,
}

impl ServerState {
    pub fn new(
        app_name: impl Into<String>,
        authenticators: Authenticators,
        channels: ChannelRegistry,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            authenticators,
            channels,
            clients: DashMap::new(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn add_client(&self, client: Arc<ServerConnection>) {
        self.clients.insert(client.id(), client);
    }

    pub fn remove_client(&self, id: &Uuid) -> Option<Arc<ServerConnection>> {
        self.clients.remove(id).map(|(_, client)| client)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns a snapshot of the connected clients.
    pub fn clients(&self) -> Vec<Arc<ServerConnection>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Runs the authenticator for `method`.
    ///
    /// Fails with [`ServerError::MissingAuthenticator`] when none is
    /// configured for that method.
    pub async fn authenticate(
        &self,
        method: AuthMethod,
        credential: Option<&str>,
    ) -> Result<Option<User>, ServerError> {
        let authenticator = self
            .authenticators
            .get(method)
            .ok_or(ServerError::MissingAuthenticator(method.as_str()))?;
        Ok(authenticator.authenticate(credential).await)
    }

    /// Appends a message to a channel and delivers it to every client.
    pub fn handle_message(
        &self,
        user: &User,
        channel: &str,
        message: &str,
        flags: &str,
    ) -> Result<ChannelMessage, ServerError> {
        let target = self
            .channels
            .get_channel(channel)
            .ok_or_else(|| ServerError::NoChannel(channel.to_string()))?;

        let record = target.message(user, message, flags);
        self.broadcast(target.name(), &record)?;
        Ok(record)
    }

    /// Queues MESSAGE_RECEIVED for `record` on every connected client.
    ///
    /// Never waits on a recipient. A closed client is skipped; a client
    /// whose outbound queue is full is disconnected with `backlogged`.
    pub fn broadcast(&self, channel: &str, record: &ChannelMessage) -> Result<(), ServerError> {
        let command = create_command(
            code::MESSAGE_RECEIVED,
            [
                Parameter::from(record.time),
                Parameter::from(channel),
                Parameter::from(&record.user),
                Parameter::from(&record.message),
                Parameter::from(&record.flags),
            ],
        )?;

        let clients = self.clients();
        tracing::debug!(
            "Delivering message in '{}' from '{}' to {} client(s)",
            channel,
            record.user,
            clients.len()
        );

        for client in clients {
            match client.endpoint().enqueue(&command) {
                Ok(()) => {}
                Err(CoreError::Transport(TransportError::Backlogged)) => {
                    tracing::warn!(
                        "{} Client is not reading, disconnecting",
                        client.network_name()
                    );
                    tokio::spawn(async move {
                        client.terminate(TerminateReason::Backlogged).await;
                    });
                }
                Err(e) => {
                    tracing::debug!("{} Skipping delivery: {}", client.network_name(), e);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("app_name", &self.app_name)
            .field("authenticators", &self.authenticators)
            .field("channels", &self.channels)
            .field("clients", &self.clients.len())
            .finish()
    }
}
