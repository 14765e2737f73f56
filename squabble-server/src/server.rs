//! TCP server implementation.

use crate::auth::Authenticators;
use crate::channel::{ChannelNamePolicy, ChannelRegistry};
use crate::connection::ServerConnection;
use crate::error::ServerError;
use crate::state::ServerState;
use futures::future::join_all;
use squabble_core::{
    drive, Endpoint, NetStream, Transport, TransportReader, OUTBOUND_QUEUE_CAPACITY,
};
use squabble_protocol::{TerminateReason, DEFAULT_PORT};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

/// Application name sent in VERSION unless configured otherwise.
pub const DEFAULT_APP_NAME: &str = "squabble-lib-server";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Application name sent to clients in VERSION.
    pub app_name: String,
    /// Idle connection timeout. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frames a client may have waiting to be written. A client that lets
    /// its queue fill up is disconnected.
    pub outbound_queue_capacity: usize,
    /// Whether referencing an unknown channel creates it.
    pub create_on_join: bool,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("app_name", &self.app_name)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("create_on_join", &self.create_on_join)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            app_name: DEFAULT_APP_NAME.to_string(),
            idle_timeout: Some(Duration::from_secs(900)),
            max_connections: 1000,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            create_on_join: true,
            tls_acceptor: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    pub fn with_create_on_join(mut self, create_on_join: bool) -> Self {
        self.create_on_join = create_on_join;
        self
    }

    /// Sets the TLS acceptor.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    /// Returns whether TLS is enabled.
    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Chat server.
pub struct Server {
    config: ServerConfig,
    state: Arc<ServerState>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    quitting: Arc<AtomicBool>,
}

impl Server {
    /// Creates a new server accepting every channel name.
    pub fn new(config: ServerConfig, authenticators: Authenticators) -> Self {
        let channels = ChannelRegistry::new(config.create_on_join);
        Self::with_channels(config, authenticators, channels)
    }

    /// Creates a new server whose channel names are checked by `policy`.
    pub fn with_channel_policy(
        config: ServerConfig,
        authenticators: Authenticators,
        policy: impl ChannelNamePolicy + 'static,
    ) -> Self {
        let channels = ChannelRegistry::new(config.create_on_join).with_policy(policy);
        Self::with_channels(config, authenticators, channels)
    }

    fn with_channels(
        config: ServerConfig,
        authenticators: Authenticators,
        channels: ChannelRegistry,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(ServerState::new(
            config.app_name.clone(),
            authenticators,
            channels,
        ));
        Self {
            config,
            state,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            quitting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Binds the configured address and runs the accept loop.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if self.quitting.load(Ordering::SeqCst) {
            return Err(ServerError::ShuttingDown);
        }
        self.running.store(true, Ordering::SeqCst);

        let tls_mode = if self.config.tls_enabled() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!("Server listening on {} ({})", listener.local_addr()?, tls_mode);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            let refuse = self.state.client_count() >= self.config.max_connections;
                            if refuse {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            }

                            let tls_acceptor = self.config.tls_acceptor.clone();
                            let app_name = self.config.app_name.clone();
                            let state = self.state.clone();
                            let stats = self.stats.clone();
                            let quitting = self.quitting.clone();
                            let idle_timeout = self.config.idle_timeout;
                            let queue_capacity = self.config.outbound_queue_capacity;

                            tokio::spawn(async move {
                                let stream = match Self::maybe_tls_accept(tcp_stream, tls_acceptor.as_deref(), addr).await {
                                    Ok(s) => s,
                                    Err(e) => {
                                        tracing::warn!("[{}] TLS handshake failed: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        return;
                                    }
                                };

                                if refuse {
                                    Self::refuse(stream, app_name).await;
                                    return;
                                }

                                let (conn, reader) =
                                    Self::register(stream, &state, &stats, idle_timeout, queue_capacity);
                                Self::run_connection(conn, reader, state, stats, quitting).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Optionally performs TLS handshake on the stream.
    async fn maybe_tls_accept(
        tcp_stream: TcpStream,
        acceptor: Option<&TlsAcceptor>,
        addr: SocketAddr,
    ) -> Result<NetStream, ServerError> {
        match acceptor {
            Some(acceptor) => {
                tracing::debug!("[{}] Performing TLS handshake", addr);
                let tls_stream = acceptor
                    .accept(tcp_stream)
                    .await
                    .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
                tracing::debug!("[{}] TLS handshake complete", addr);
                Ok(NetStream::from(tls_stream))
            }
            None => Ok(NetStream::from(tcp_stream)),
        }
    }

    /// Serves a connection over an already established stream.
    ///
    /// The connection is driven on its own task; the returned handle can be
    /// used to observe or close it.
    pub fn accept_stream(&self, stream: NetStream) -> Arc<ServerConnection> {
        let (conn, reader) = Self::register(
            stream,
            &self.state,
            &self.stats,
            self.config.idle_timeout,
            self.config.outbound_queue_capacity,
        );
        tokio::spawn(Self::run_connection(
            conn.clone(),
            reader,
            self.state.clone(),
            self.stats.clone(),
            self.quitting.clone(),
        ));
        conn
    }

    /// Tells a connection over the limit why it is being closed.
    async fn refuse(stream: NetStream, app_name: String) {
        let (transport, _reader) = Transport::new(stream, None);
        let endpoint = Endpoint::new(app_name, transport);
        if let Err(e) = endpoint.terminate_connection(TerminateReason::ServerFull).await {
            tracing::debug!("{} Could not notify refused client: {}", endpoint.network_name(), e);
        }
    }

    fn register(
        stream: NetStream,
        state: &Arc<ServerState>,
        stats: &ServerStats,
        idle_timeout: Option<Duration>,
        queue_capacity: usize,
    ) -> (Arc<ServerConnection>, TransportReader) {
        let tls_status = if stream.is_tls() { " (TLS)" } else { "" };
        let (transport, reader) = Transport::with_capacity(stream, idle_timeout, queue_capacity);
        let conn = Arc::new(ServerConnection::new(state.clone(), transport));

        tracing::info!(
            "New client connected from {}{}",
            conn.network_name(),
            tls_status
        );
        state.add_client(conn.clone());
        stats.connections_total.fetch_add(1, Ordering::Relaxed);
        stats.connections_active.fetch_add(1, Ordering::Relaxed);
        (conn, reader)
    }

    async fn run_connection(
        conn: Arc<ServerConnection>,
        reader: TransportReader,
        state: Arc<ServerState>,
        stats: Arc<ServerStats>,
        quitting: Arc<AtomicBool>,
    ) {
        // Registered after `quit` took its snapshot of the clients.
        if quitting.load(Ordering::SeqCst) {
            conn.quit().await;
        }

        drive(conn.clone(), reader).await;

        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        state.remove_client(&conn.id());
        tracing::info!("Client disconnected from {}", conn.network_name());
    }

    /// Disconnects every client with `quitting`, then stops accepting.
    ///
    /// Only the first call has any effect.
    pub async fn quit(&self) {
        if self.quitting.swap(true, Ordering::SeqCst) {
            return;
        }

        let clients = self.state.clients();
        tracing::info!("Disconnecting {} client(s)", clients.len());
        join_all(clients.iter().map(|client| client.quit())).await;
        self.shutdown();
    }

    /// Stops the accept loop without touching connected clients.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
