//! NUL-framed transport over a [`NetStream`].
//!
//! The stream is split into a [`Transport`] (write side, shared by every
//! task that sends on the connection) and a [`TransportReader`] (read side,
//! owned by the connection's driver task).
//!
//! Writes go through a bounded queue drained by a writer task, so a peer
//! that stops reading only ever stalls its own connection.

use crate::error::TransportError;
use crate::stream::NetStream;
use bytes::BytesMut;
use squabble_protocol::{encode_frame, FrameDecoder, ProtocolError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Notify};

/// How long to wait for the peer to close its side after a local `end()`.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// How long `end()` lets queued frames drain before dropping them.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames a connection may have waiting to be written.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Queue slots [`Transport::enqueue`] leaves free for CONNECTION_TERMINATE
/// and the shutdown that follows it.
const CONTROL_RESERVE: usize = 2;

const READ_BUFFER_SIZE: usize = 8 * 1024;

enum Outbound {
    Frame {
        frame: BytesMut,
        written: Option<oneshot::Sender<Result<(), TransportError>>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Write side of a connection.
pub struct Transport {
    network_id: String,
    transport_name: &'static str,
    outbound: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    abort: Arc<Notify>,
}

/// Something that happened on the read side.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete frame, without its delimiter.
    Frame(String),
    Error(TransportError),
    /// No bytes arrived within the idle timeout.
    Timeout,
    /// The stream is closed.
    End,
}

/// Read side of a connection.
pub struct TransportReader {
    reader: ReadHalf<NetStream>,
    decoder: FrameDecoder,
    idle_timeout: Option<Duration>,
    buf: Vec<u8>,
    eof: bool,
}

impl Transport {
    /// Splits `stream` into a transport and its reader, with the default
    /// outbound queue capacity.
    ///
    /// Must be called from within a Tokio runtime; the writer runs as its
    /// own task.
    pub fn new(stream: NetStream, idle_timeout: Option<Duration>) -> (Transport, TransportReader) {
        Self::with_capacity(stream, idle_timeout, OUTBOUND_QUEUE_CAPACITY)
    }

    /// Like [`Transport::new`] with room for `capacity` queued frames.
    pub fn with_capacity(
        stream: NetStream,
        idle_timeout: Option<Duration>,
        capacity: usize,
    ) -> (Transport, TransportReader) {
        let network_id = stream.network_id();
        let transport_name = stream.transport_name();
        let (read_half, write_half) = tokio::io::split(stream);

        let (outbound, queue) = mpsc::channel(capacity.max(CONTROL_RESERVE + 1));
        let open = Arc::new(AtomicBool::new(true));
        let abort = Arc::new(Notify::new());

        let writer = Writer {
            stream: write_half,
            queue,
            open: open.clone(),
            abort: abort.clone(),
            network_name: format!("[{}: {}]", transport_name, network_id),
        };
        tokio::spawn(writer.run());

        let transport = Transport {
            network_id,
            transport_name,
            outbound,
            open,
            abort,
        };
        let reader = TransportReader {
            reader: read_half,
            decoder: FrameDecoder::new(),
            idle_timeout,
            buf: vec![0u8; READ_BUFFER_SIZE],
            eof: false,
        };
        (transport, reader)
    }

    /// Writes one command followed by the frame delimiter and waits until
    /// it has been written.
    ///
    /// Fails with [`TransportError::SocketClosed`] without writing when the
    /// transport has been ended.
    pub async fn send(&self, command: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SocketClosed);
        }
        let frame = encode_frame(command)?;

        let (written, done) = oneshot::channel();
        self.outbound
            .send(Outbound::Frame {
                frame,
                written: Some(written),
            })
            .await
            .map_err(|_| TransportError::SocketClosed)?;
        done.await.unwrap_or(Err(TransportError::SocketClosed))?;

        tracing::trace!("{} send '{}'", self.network_name(), command);
        Ok(())
    }

    /// Queues one command without waiting for it to be written.
    ///
    /// Fails with [`TransportError::Backlogged`] when the peer is not
    /// reading fast enough to keep the queue from filling up.
    pub fn enqueue(&self, command: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SocketClosed);
        }
        if self.outbound.capacity() <= CONTROL_RESERVE {
            return Err(TransportError::Backlogged);
        }
        self.push(command)
    }

    /// Queues the last command before `end()`, using the reserved slots.
    pub(crate) fn enqueue_last(&self, command: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::SocketClosed);
        }
        self.push(command)
    }

    fn push(&self, command: &str) -> Result<(), TransportError> {
        let frame = encode_frame(command)?;
        self.outbound
            .try_send(Outbound::Frame {
                frame,
                written: None,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Backlogged,
                TrySendError::Closed(_) => TransportError::SocketClosed,
            })?;
        tracing::trace!("{} queued '{}'", self.network_name(), command);
        Ok(())
    }

    /// Flushes queued frames and closes the write side. Safe to call more
    /// than once.
    ///
    /// Frames still queued after [`FLUSH_TIMEOUT`] are dropped.
    pub async fn end(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let (shutdown, done) = oneshot::channel();
        if self.outbound.try_send(Outbound::Shutdown(shutdown)).is_err() {
            self.abort();
            return;
        }
        if tokio::time::timeout(FLUSH_TIMEOUT, done).await.is_err() {
            tracing::debug!(
                "{} peer is not reading, dropping queued frames",
                self.network_name()
            );
            self.abort();
        }
    }

    /// Closes the write side at once, dropping queued frames and any write
    /// in progress.
    pub fn abort(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.abort.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    /// `[transport-name: network-id]`, stable for the life of the connection.
    pub fn network_name(&self) -> String {
        format!("[{}: {}]", self.transport_name, self.network_id)
    }
}

/// Drains the outbound queue onto the stream.
struct Writer {
    stream: WriteHalf<NetStream>,
    queue: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
    abort: Arc<Notify>,
    network_name: String,
}

impl Writer {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.abort.notified() => break,
                next = self.queue.recv() => next,
            };

            match next {
                Some(Outbound::Frame { frame, written }) => {
                    let result = tokio::select! {
                        biased;
                        _ = self.abort.notified() => Err(TransportError::SocketClosed),
                        result = write_frame(&mut self.stream, &frame) => {
                            result.map_err(TransportError::Io)
                        }
                    };
                    let failed = result.is_err();
                    if let Err(ref e) = result {
                        tracing::debug!("{} write failed: {}", self.network_name, e);
                    }
                    if let Some(written) = written {
                        let _ = written.send(result);
                    }
                    if failed {
                        break;
                    }
                }
                Some(Outbound::Shutdown(done)) => {
                    tokio::select! {
                        biased;
                        _ = self.abort.notified() => {}
                        result = self.stream.shutdown() => {
                            if let Err(e) = result {
                                tracing::debug!("{} shutdown failed: {}", self.network_name, e);
                            }
                        }
                    }
                    let _ = done.send(());
                    break;
                }
                None => {
                    let _ = tokio::time::timeout(FLUSH_TIMEOUT, self.stream.shutdown()).await;
                    break;
                }
            }
        }

        self.open.store(false, Ordering::SeqCst);
        tracing::trace!("{} writer stopped", self.network_name);
    }
}

async fn write_frame(stream: &mut WriteHalf<NetStream>, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

impl TransportReader {
    /// Waits for the next frame or lifecycle event.
    ///
    /// With `closing` set, the idle timeout is replaced by [`CLOSE_GRACE`]
    /// and its expiry reports [`TransportEvent::End`].
    pub async fn next_event(&mut self, closing: bool) -> TransportEvent {
        loop {
            match self.decoder.decode_frame() {
                Ok(Some(frame)) => return TransportEvent::Frame(frame),
                Ok(None) => {}
                Err(ProtocolError::InvalidUtf8) => {
                    tracing::debug!("Dropping frame with invalid UTF-8");
                    continue;
                }
                Err(e) => {
                    self.decoder.clear();
                    return TransportEvent::Error(TransportError::Protocol(e));
                }
            }

            if self.eof {
                return TransportEvent::End;
            }

            let wait = if closing {
                Some(CLOSE_GRACE)
            } else {
                self.idle_timeout
            };

            let read = self.reader.read(&mut self.buf);
            let result = match wait {
                Some(limit) => match tokio::time::timeout(limit, read).await {
                    Ok(result) => result,
                    Err(_) if closing => return TransportEvent::End,
                    Err(_) => return TransportEvent::Timeout,
                },
                None => read.await,
            };

            match result {
                Ok(0) => {
                    if self.decoder.buffered() > 0 {
                        tracing::debug!(
                            "Discarding {} bytes of incomplete frame",
                            self.decoder.buffered()
                        );
                        self.decoder.clear();
                    }
                    self.eof = true;
                }
                Ok(n) => self.decoder.extend(&self.buf[..n]),
                Err(e) => return TransportEvent::Error(TransportError::Io(e)),
            }
        }
    }

    /// Returns the number of bytes of an incomplete frame currently held.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }
}
