//! Command dispatch for a single connection.

use crate::endpoint::{ConnectionEvent, Endpoint};
use crate::error::HandlerError;
use crate::stage::{typed, Flow, Outcome, Stage, StageTable};
use crate::transport::{TransportEvent, TransportReader};
use futures::FutureExt;
use squabble_protocol::args::schema;
use squabble_protocol::{code, Command, TerminateReason};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A connection driven by the engine.
pub trait Peer: Send + Sync + Sized + 'static {
    fn endpoint(&self) -> &Endpoint;

    fn stages(&self) -> &StageTable<Self>;

    /// Inspects raw frame text before parsing. Returning a reason
    /// terminates the connection and drops the frame.
    fn screen(&self, _raw: &str) -> Option<TerminateReason> {
        None
    }
}

/// Registers the handlers both ends of a connection share.
pub fn base_stages<C: Peer>(table: &mut StageTable<C>) {
    table
        .stage(
            Stage::Parse,
            code::CONNECTION_TERMINATE,
            typed(schema::CONNECTION_TERMINATE),
        )
        .stage(Stage::Parse, code::VERSION, typed(schema::VERSION))
        .stage(Stage::Parse, code::AUTH_APPROVED, typed(schema::AUTH_APPROVED))
        .stage(Stage::Parse, code::BAD_COMMAND, typed(schema::BAD_COMMAND))
        .stage(
            Stage::Parse,
            code::MESSAGE_RECEIVED,
            typed(schema::MESSAGE_RECEIVED),
        )
        .stage(Stage::Log, code::WILDCARD, log_inbound::<C>)
        .stage(
            Stage::Action,
            code::CONNECTION_TERMINATE,
            remote_terminated::<C>,
        )
        .stage(Stage::Action, code::BAD_COMMAND, remote_bad_command::<C>);
}

async fn log_inbound<C: Peer>(conn: Arc<C>, command: Command) -> Result<Outcome, HandlerError> {
    tracing::debug!(
        "{} recv {} ({}) {:?}",
        conn.endpoint().network_name(),
        command.code,
        code::name(&command.code).unwrap_or("unknown"),
        command.parameters
    );
    Ok(Outcome::Unchanged)
}

async fn remote_terminated<C: Peer>(
    conn: Arc<C>,
    command: Command,
) -> Result<Outcome, HandlerError> {
    let endpoint = conn.endpoint();
    tracing::info!(
        "{} Remote terminated connection with reason '{}'",
        endpoint.network_name(),
        command.arg_str("reason").unwrap_or("")
    );
    endpoint.transport().end().await;
    Ok(Outcome::Unchanged)
}

async fn remote_bad_command<C: Peer>(
    conn: Arc<C>,
    command: Command,
) -> Result<Outcome, HandlerError> {
    tracing::warn!(
        "{} Remote rejected command {} with reason '{}'",
        conn.endpoint().network_name(),
        command.arg_str("command").unwrap_or("?"),
        command.arg_str("reason").unwrap_or("")
    );
    Ok(Outcome::Unchanged)
}

/// Runs the wildcard pipeline, then the pipeline for the command's own code.
pub async fn process_command<C: Peer>(
    conn: &Arc<C>,
    command: Command,
) -> Result<Flow, HandlerError> {
    let stages = conn.stages();
    let code = command.code.clone();
    let flow = stages
        .run_stages(conn, code::WILDCARD, Flow::Continue(command))
        .await?;
    stages.run_stages(conn, &code, flow).await
}

/// Processes one raw frame.
///
/// Handler errors and panics never escape: they are logged and the
/// connection is terminated with `internal-error`.
pub async fn handle_command<C: Peer>(conn: &Arc<C>, raw: &str) {
    let endpoint = conn.endpoint();

    if let Some(reason) = conn.screen(raw) {
        tracing::warn!(
            "{} Refusing {} byte command: {}",
            endpoint.network_name(),
            raw.len(),
            reason
        );
        terminate_quietly(endpoint, reason).await;
        return;
    }

    let Some(command) = Command::parse(raw) else {
        tracing::trace!("{} Ignoring empty frame", endpoint.network_name());
        return;
    };

    endpoint.emit(ConnectionEvent::Received(command.clone()));

    let result = AssertUnwindSafe(process_command(conn, command))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(Flow::Continue(settled))) => endpoint.emit(ConnectionEvent::Settled(settled)),
        Ok(Ok(Flow::Rejected)) => {}
        Ok(Err(e)) => {
            tracing::error!("{} Handler failed: {}", endpoint.network_name(), e);
            terminate_quietly(endpoint, TerminateReason::InternalError).await;
        }
        Err(_) => {
            tracing::error!("{} Handler panicked", endpoint.network_name());
            terminate_quietly(endpoint, TerminateReason::InternalError).await;
        }
    }
}

async fn terminate_quietly(endpoint: &Endpoint, reason: TerminateReason) {
    if let Err(e) = endpoint.terminate_connection(reason).await {
        tracing::debug!(
            "{} Could not notify peer of termination: {}",
            endpoint.network_name(),
            e
        );
    }
}

/// Reads frames and dispatches them until the stream closes.
///
/// Frames are handled one at a time in arrival order. Frames arriving
/// after the local side has closed are dropped.
pub async fn drive<C: Peer>(conn: Arc<C>, mut reader: TransportReader) {
    let endpoint = conn.endpoint();

    loop {
        let closing = !endpoint.transport().is_connected();
        match reader.next_event(closing).await {
            TransportEvent::Frame(raw) => {
                if closing {
                    tracing::trace!("{} Dropping frame after close", endpoint.network_name());
                    continue;
                }
                handle_command(&conn, &raw).await;
            }
            TransportEvent::Timeout => {
                tracing::info!("{} Idle timeout", endpoint.network_name());
                terminate_quietly(endpoint, TerminateReason::Timeout).await;
            }
            TransportEvent::Error(e) => {
                tracing::warn!("{} Transport error: {}", endpoint.network_name(), e);
                terminate_quietly(endpoint, e.terminate_reason()).await;
            }
            TransportEvent::End => break,
        }
    }

    endpoint.transport().end().await;
    endpoint.finish();
    tracing::debug!("{} Connection ended", endpoint.network_name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NetStream;
    use crate::transport::Transport;
    use squabble_protocol::ArgValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct TestPeer {
        endpoint: Endpoint,
        stages: StageTable<TestPeer>,
        after_reject: AtomicUsize,
    }

    impl Peer for TestPeer {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        fn stages(&self) -> &StageTable<Self> {
            &self.stages
        }

        fn screen(&self, raw: &str) -> Option<TerminateReason> {
            (raw.len() > 64).then_some(TerminateReason::BadLength)
        }
    }

    async fn reject(_conn: Arc<TestPeer>, _command: Command) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Reject)
    }

    async fn count(conn: Arc<TestPeer>, _command: Command) -> Result<Outcome, HandlerError> {
        conn.after_reject.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Unchanged)
    }

    async fn fail(_conn: Arc<TestPeer>, _command: Command) -> Result<Outcome, HandlerError> {
        Err(HandlerError::Configuration("missing collaborator".into()))
    }

    async fn explode(_conn: Arc<TestPeer>, _command: Command) -> Result<Outcome, HandlerError> {
        panic!("handler bug");
    }

    fn peer() -> (Arc<TestPeer>, TransportReader, DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let (transport, reader) = Transport::new(NetStream::from(local), None);

        let mut stages = StageTable::new();
        base_stages(&mut stages);
        stages
            .stage(Stage::Action, code::MESSAGE_SEND, reject)
            .stage(Stage::Action, code::MESSAGE_SEND, count)
            .stage(Stage::Action, "T01", fail)
            .stage(Stage::Action, "T02", explode);

        let peer = Arc::new(TestPeer {
            endpoint: Endpoint::new("test", transport),
            stages,
            after_reject: AtomicUsize::new(0),
        });
        (peer, reader, remote)
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
    async fn test_rejected_command_stops_pipeline() {
        let (peer, _reader, _remote) = peer();
        let command = Command::parse("M00 <#general> <hi>").unwrap();

        let flow = process_command(&peer, command).await.unwrap();
        assert_eq!(flow, Flow::Rejected);
        assert_eq!(peer.after_reject.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_base_stages_type_version() {
        let (peer, _reader, _remote) = peer();
        let command = Command::parse("V01 <squabble-client> <1>").unwrap();

        let settled = process_command(&peer, command)
            .await
            .unwrap()
            .into_command()
            .unwrap();
        assert_eq!(settled.arg_str("app_name"), Some("squabble-client"));
        assert_eq!(settled.arg("protocol_version"), Some(&ArgValue::Int(1)));
    }

    #[tokio::test]
    async fn test_settled_and_received_events() {
        let (peer, _reader, _remote) = peer();
        let mut events = peer.endpoint().events();

        handle_command(&peer, "A00").await;
        handle_command(&peer, "M00 <#general> <hi>").await;
        handle_command(&peer, "   ").await;

        let received = events.recv().await.unwrap();
        assert!(matches!(received, ConnectionEvent::Received(ref c) if c.code == "A00"));
        let settled = events.recv().await.unwrap();
        assert!(matches!(settled, ConnectionEvent::Settled(ref c) if c.code == "A00"));
        let received = events.recv().await.unwrap();
        assert!(matches!(received, ConnectionEvent::Received(ref c) if c.code == "M00"));
        // Rejected commands never settle, blank frames are never received.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_error_terminates_with_internal_error() {
        let (peer, _reader, mut remote) = peer();
        handle_command(&peer, "T01").await;

        assert_eq!(read_frame(&mut remote).await, "X01 <internal-error>");
        assert!(!peer.endpoint().transport().is_connected());
    }

    #[tokio::test]
    async fn test_handler_panic_terminates_with_internal_error() {
        let (peer, _reader, mut remote) = peer();
        handle_command(&peer, "T02").await;

        assert_eq!(read_frame(&mut remote).await, "X01 <internal-error>");
    }

    #[tokio::test]
    async fn test_screen_refuses_frame() {
        let (peer, _reader, mut remote) = peer();
        let mut events = peer.endpoint().events();
        handle_command(&peer, &format!("A00 <{}>", "x".repeat(100))).await;

        assert_eq!(read_frame(&mut remote).await, "X01 <bad-length>");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drive_handles_remote_terminate() {
        let (peer, reader, mut remote) = peer();
        let mut events = peer.endpoint().events();
        let task = tokio::spawn(drive(peer.clone(), reader));

        remote.write_all(b"X01 <quitting>\0").await.unwrap();

        // The local side closes its write half in response.
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        drop(remote);
        task.await.unwrap();

        assert!(peer.endpoint().is_ended());
        let mut saw_ended = false;
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::Settled(ref c) = event {
                assert_eq!(c.arg_str("reason"), Some("quitting"));
            }
            saw_ended |= event == ConnectionEvent::Ended;
        }
        assert!(saw_ended);
    }

    #[tokio::test]
    async fn test_drive_ends_on_eof() {
        let (peer, reader, remote) = peer();
        drop(remote);
        drive(peer.clone(), reader).await;
        assert!(peer.endpoint().is_ended());
        assert!(!peer.endpoint().transport().is_connected());
    }
}
