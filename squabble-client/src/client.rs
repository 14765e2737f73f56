//! Client connection state machine.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::keepalive;
use crate::tls::create_tls_connector;
use squabble_core::{
    base_stages, drive, ConnectionEvent, Endpoint, HandlerError, NetStream, Outcome, Peer,
    Settlements, Stage, StageTable, Transport,
};
use squabble_protocol::{code, ArgValue, Command, Parameter, TerminateReason, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};

/// Capacity of the chat message channel.
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// A chat message delivered by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Unix time in milliseconds, as stamped by the server.
    pub time: i64,
    pub channel: String,
    pub user: String,
    pub message: String,
    pub flags: String,
}

impl ChatMessage {
    fn from_command(command: &Command) -> Self {
        let text = |name: &str| command.arg_str(name).unwrap_or("").to_string();
        Self {
            time: command
                .arg("time")
                .and_then(ArgValue::as_f64)
                .map(|t| t as i64)
                .unwrap_or(0),
            channel: text("channel"),
            user: text("user"),
            message: text("message"),
            flags: text("flags"),
        }
    }
}

/// A connection to a squabble server.
pub struct Client {
    config: ClientConfig,
    endpoint: Endpoint,
    stages: StageTable<Client>,
    authenticated: AtomicBool,
    messages: broadcast::Sender<ChatMessage>,
}

impl Client {
    fn new(config: ClientConfig, transport: Transport) -> Self {
        let mut stages = StageTable::new();
        base_stages(&mut stages);
        stages
            .stage(Stage::Action, code::VERSION, on_version)
            .stage(Stage::Action, code::AUTH_APPROVED, on_auth_approved)
            .stage(Stage::Action, code::MESSAGE_RECEIVED, on_message_received);

        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            endpoint: Endpoint::new(config.app_name.clone(), transport),
            config,
            stages,
            authenticated: AtomicBool::new(false),
            messages,
        }
    }

    /// Connects to `host:port`, upgrades to TLS if configured, and performs
    /// the handshake.
    pub async fn connect(
        config: ClientConfig,
        host: &str,
        port: u16,
    ) -> Result<Arc<Client>, ClientError> {
        tracing::debug!("Connecting to {}:{}...", host, port);

        let tcp_stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;
        tcp_stream.set_nodelay(true).ok();

        let stream = match config.tls {
            Some(ref tls_config) if tls_config.enabled => {
                let (connector, server_name) = create_tls_connector(tls_config, host)?;
                tracing::debug!("Performing TLS handshake...");
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                tracing::debug!("TLS handshake complete");
                NetStream::from(tls_stream)
            }
            _ => NetStream::from(tcp_stream),
        };

        Self::connect_stream(config, stream).await
    }

    /// Performs the handshake over an established stream.
    ///
    /// Resolves once the server has approved authentication. Fails with
    /// [`ClientError::Rejected`] carrying the server's reason otherwise.
    pub async fn connect_stream(
        config: ClientConfig,
        stream: NetStream,
    ) -> Result<Arc<Client>, ClientError> {
        let handshake_timeout = config.handshake_timeout;
        let (transport, reader) = Transport::new(stream, None);
        let client = Arc::new(Client::new(config, transport));

        let settlements = client.endpoint.subscribe();
        tokio::spawn(drive(client.clone(), reader));
        keepalive::spawn(&client);

        let result = tokio::time::timeout(handshake_timeout, client.handshake(settlements))
            .await
            .unwrap_or(Err(ClientError::Timeout));

        if let Err(e) = result {
            tracing::debug!("{} Handshake failed: {}", client.network_name(), e);
            let reason = match e {
                ClientError::Timeout => TerminateReason::Timeout,
                ClientError::Rejected(_) => TerminateReason::BadCommand,
                _ => TerminateReason::InternalError,
            };
            // A server that already hung up is not notified.
            if client.is_connected() {
                if let Err(notify) = client.endpoint.terminate_connection(reason).await {
                    tracing::debug!(
                        "{} Could not notify server: {}",
                        client.network_name(),
                        notify
                    );
                }
            }
            return Err(e);
        }

        tracing::info!("{} Connected", client.network_name());
        client.endpoint.emit(ConnectionEvent::Connected);
        Ok(client)
    }

    async fn handshake(&self, mut settlements: Settlements) -> Result<(), ClientError> {
        tracing::debug!("{} Starting protocol handshake...", self.network_name());
        self.endpoint.send_version().await?;

        let version = settlements.receive().await?;
        if version.code != code::VERSION {
            return Err(ClientError::Rejected(settlement_reason(&version)));
        }

        let auth = settlements.receive().await?;
        if auth.code != code::AUTH_APPROVED {
            return Err(ClientError::Rejected(settlement_reason(&auth)));
        }
        Ok(())
    }

    async fn authenticate(&self) -> Result<(), HandlerError> {
        let (command_code, credential) = self.config.authentication.command();
        self.endpoint.send_command(command_code, [credential]).await?;
        Ok(())
    }

    /// Sends a chat message to `channel`.
    pub async fn send_message(
        &self,
        channel: &str,
        message: &str,
        flags: &str,
    ) -> Result<(), ClientError> {
        self.endpoint
            .send_command(code::MESSAGE_SEND, [channel, message, flags])
            .await?;
        Ok(())
    }

    /// Sends an arbitrary command.
    pub async fn send_command<I, P>(&self, command_code: &str, parameters: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Parameter>,
    {
        self.endpoint.send_command(command_code, parameters).await?;
        Ok(())
    }

    /// Disconnects with reason `quitting`.
    pub async fn quit(&self) -> Result<(), ClientError> {
        self.endpoint
            .terminate_connection(TerminateReason::Quitting)
            .await?;
        Ok(())
    }

    /// Waits until the connection has ended.
    pub async fn closed(&self) {
        let mut events = self.endpoint.events();
        if self.endpoint.is_ended() {
            return;
        }
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Ended) | Err(RecvError::Closed) => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    }

    /// Subscribes to chat messages delivered after this call.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.messages.subscribe()
    }

    /// Subscribes to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.endpoint.events()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.transport().is_connected()
    }

    pub fn network_name(&self) -> String {
        self.endpoint.network_name()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Peer for Client {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn stages(&self) -> &StageTable<Self> {
        &self.stages
    }
}

fn settlement_reason(command: &Command) -> String {
    command
        .arg_str("reason")
        .unwrap_or(command.code.as_str())
        .to_string()
}

async fn on_version(client: Arc<Client>, command: Command) -> Result<Outcome, HandlerError> {
    let version = command.arg("protocol_version").and_then(ArgValue::as_i64);
    if version != Some(i64::from(PROTOCOL_VERSION)) {
        tracing::warn!(
            "{} Server speaks protocol version {:?}, expected {}",
            client.network_name(),
            command.arg("protocol_version"),
            PROTOCOL_VERSION
        );
        if let Err(e) = client
            .endpoint
            .terminate_connection(TerminateReason::BadVersion)
            .await
        {
            tracing::debug!("{} Could not notify server: {}", client.network_name(), e);
        }
        return Ok(Outcome::Reject);
    }

    tracing::debug!(
        "{} Server identifies as {:?}",
        client.network_name(),
        command.arg_str("app_name")
    );
    if !client.is_authenticated() {
        client.authenticate().await?;
    }
    Ok(Outcome::Unchanged)
}

async fn on_auth_approved(client: Arc<Client>, _command: Command) -> Result<Outcome, HandlerError> {
    client.authenticated.store(true, Ordering::SeqCst);
    tracing::debug!("{} Authentication approved", client.network_name());
    Ok(Outcome::Unchanged)
}

async fn on_message_received(
    client: Arc<Client>,
    command: Command,
) -> Result<Outcome, HandlerError> {
    // No subscribers is fine.
    let _ = client.messages.send(ChatMessage::from_command(&command));
    Ok(Outcome::Unchanged)
}
