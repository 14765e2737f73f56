//! One end of a connection: transport, identity and lifecycle events.

use crate::error::CoreError;
use crate::transport::Transport;
use squabble_protocol::{
    code, create_command, Command, Parameter, TerminateReason, PROTOCOL_VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;

/// Capacity of the per-connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observable connection lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A frame was parsed into a command, before any stage ran.
    Received(Command),
    /// A command made it through every stage without being rejected.
    Settled(Command),
    /// The handshake completed.
    Connected,
    /// The connection is closed. Emitted once.
    Ended,
}

/// State shared by every connection type.
pub struct Endpoint {
    app_name: String,
    transport: Transport,
    events: broadcast::Sender<ConnectionEvent>,
    activity: Arc<Notify>,
    ended: AtomicBool,
}

impl Endpoint {
    pub fn new(app_name: impl Into<String>, transport: Transport) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            app_name: app_name.into(),
            transport,
            events,
            activity: Arc::new(Notify::new()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn network_name(&self) -> String {
        self.transport.network_name()
    }

    /// Sends raw command text.
    pub async fn send(&self, command: &str) -> Result<(), CoreError> {
        self.transport.send(command).await?;
        self.activity.notify_one();
        Ok(())
    }

    /// Queues raw command text without waiting for it to be written.
    ///
    /// Used for fan-out, where one slow peer must not hold up the sender.
    pub fn enqueue(&self, command: &str) -> Result<(), CoreError> {
        self.transport.enqueue(command)?;
        Ok(())
    }

    /// Builds and sends a command.
    pub async fn send_command<I, P>(&self, code: &str, parameters: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Parameter>,
    {
        let command = create_command(code, parameters)?;
        self.send(&command).await
    }

    /// Sends VERSION with this side's app name and protocol version.
    pub async fn send_version(&self) -> Result<(), CoreError> {
        self.send_command(
            code::VERSION,
            [
                Parameter::from(self.app_name.as_str()),
                Parameter::from(PROTOCOL_VERSION),
            ],
        )
        .await
    }

    /// Sends CONNECTION_TERMINATE with `reason`, then closes the transport.
    ///
    /// The notification is queued behind anything already waiting to be
    /// written. The transport is closed even when the notification cannot
    /// be queued, and closing does not wait on a peer that stopped reading
    /// for longer than [`FLUSH_TIMEOUT`](crate::transport::FLUSH_TIMEOUT).
    pub async fn terminate_connection(&self, reason: TerminateReason) -> Result<(), CoreError> {
        tracing::debug!("{} Terminating connection: {}", self.network_name(), reason);
        let result = create_command(code::CONNECTION_TERMINATE, [reason.as_str()])
            .map_err(CoreError::from)
            .and_then(|command| self.transport.enqueue_last(&command).map_err(CoreError::from));
        self.transport.end().await;
        result
    }

    /// Subscribes to settled commands.
    ///
    /// Take the subscription before sending the command whose reply is
    /// awaited, so the reply cannot be missed.
    pub fn subscribe(&self) -> Settlements {
        let rx = self.events.subscribe();
        Settlements {
            rx,
            ended: self.is_ended(),
        }
    }

    /// Subscribes to every lifecycle event.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Marks the connection ended and emits [`ConnectionEvent::Ended`] once.
    pub fn finish(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.emit(ConnectionEvent::Ended);
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Signalled on every successful send.
    pub fn activity(&self) -> Arc<Notify> {
        self.activity.clone()
    }
}

/// Receives settled commands in order.
pub struct Settlements {
    rx: broadcast::Receiver<ConnectionEvent>,
    ended: bool,
}

impl Settlements {
    /// Waits for the next settled command.
    ///
    /// Fails with [`CoreError::ConnectionEnded`] once the connection ends.
    pub async fn receive(&mut self) -> Result<Command, CoreError> {
        if self.ended {
            return Err(CoreError::ConnectionEnded);
        }
        loop {
            match self.rx.recv().await {
                Ok(ConnectionEvent::Settled(command)) => return Ok(command),
                Ok(ConnectionEvent::Ended) | Err(RecvError::Closed) => {
                    self.ended = true;
                    return Err(CoreError::ConnectionEnded);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Settlement subscriber lagged, {} events skipped", skipped);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NetStream;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn endpoint() -> (Endpoint, DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let (transport, _reader) = Transport::new(NetStream::from(local), None);
        (Endpoint::new("test-app", transport), remote)
    }

    async fn read_frame(remote: &mut DuplexStream) -> String {
        let mut out = Vec::new();
        loop {
            let byte = remote.read_u8().await.unwrap();
            if byte == 0 {
                return String::from_utf8(out).unwrap();
            }
            out.push(byte);
        }
    }

    #[tokio::test]
    async fn test_send_version() {
        let (endpoint, mut remote) = endpoint();
        endpoint.send_version().await.unwrap();
        assert_eq!(read_frame(&mut remote).await, "V01 <test-app> <1>");
    }

    #[tokio::test]
    async fn test_terminate_sends_reason_and_closes() {
        let (endpoint, mut remote) = endpoint();
        endpoint
            .terminate_connection(TerminateReason::BadAuth)
            .await
            .unwrap();

        assert_eq!(read_frame(&mut remote).await, "X01 <bad-auth>");
        assert!(!endpoint.transport().is_connected());

        // Second terminate still closes, but cannot notify.
        let result = endpoint
            .terminate_connection(TerminateReason::Quitting)
            .await;
        assert!(matches!(result, Err(ref e) if e.is_closed()));
    }

    #[tokio::test]
    async fn test_terminate_does_not_hang_on_stalled_peer() {
        let (local, _remote) = tokio::io::duplex(16);
        let (transport, _reader) = Transport::with_capacity(NetStream::from(local), None, 8);
        let endpoint = Endpoint::new("test-app", transport);
        while endpoint.enqueue("M01 <#general> <alice> <hello>").is_ok() {
            tokio::task::yield_now().await;
        }

        let result = tokio::time::timeout(
            crate::transport::FLUSH_TIMEOUT + std::time::Duration::from_secs(2),
            endpoint.terminate_connection(TerminateReason::Backlogged),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
        assert!(!endpoint.transport().is_connected());
    }

    #[tokio::test]
    async fn test_settlements_skip_other_events() {
        let (endpoint, _remote) = endpoint();
        let mut settlements = endpoint.subscribe();

        let command = Command::parse("A00").unwrap();
        endpoint.emit(ConnectionEvent::Received(command.clone()));
        endpoint.emit(ConnectionEvent::Settled(command.clone()));

        assert_eq!(settlements.receive().await.unwrap(), command);
    }

    #[tokio::test]
    async fn test_settlements_fail_on_end() {
        let (endpoint, _remote) = endpoint();
        let mut settlements = endpoint.subscribe();

        endpoint.finish();
        endpoint.finish();

        assert!(matches!(
            settlements.receive().await,
            Err(CoreError::ConnectionEnded)
        ));
        assert!(matches!(
            endpoint.subscribe().receive().await,
            Err(CoreError::ConnectionEnded)
        ));
    }

    #[tokio::test]
    async fn test_ended_emitted_once() {
        let (endpoint, _remote) = endpoint();
        let mut events = endpoint.events();

        endpoint.finish();
        endpoint.finish();
        endpoint.emit(ConnectionEvent::Connected);

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ended);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    }
}
