//! Stream abstraction for plain TCP, TLS and in-memory pipes.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

pin_project! {
    /// A bidirectional byte stream carrying one connection.
    #[project = NetStreamProj]
    pub enum NetStream {
        Plain { #[pin] stream: TcpStream },
        ServerTls { #[pin] stream: ServerTlsStream<TcpStream> },
        ClientTls { #[pin] stream: ClientTlsStream<TcpStream> },
        Memory { #[pin] stream: DuplexStream },
    }
}

impl NetStream {
    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(
            self,
            NetStream::ServerTls { .. } | NetStream::ClientTls { .. }
        )
    }

    /// Short name of the underlying transport, for log output.
    pub fn transport_name(&self) -> &'static str {
        match self {
            NetStream::Plain { .. } => "tcp-socket",
            NetStream::ServerTls { .. } | NetStream::ClientTls { .. } => "tls-socket",
            NetStream::Memory { .. } => "memory",
        }
    }

    /// Identity of the remote end (`address:port` for sockets).
    pub fn network_id(&self) -> String {
        let addr = match self {
            NetStream::Plain { stream } => stream.peer_addr(),
            NetStream::ServerTls { stream } => stream.get_ref().0.peer_addr(),
            NetStream::ClientTls { stream } => stream.get_ref().0.peer_addr(),
            NetStream::Memory { .. } => return "memory".to_string(),
        };
        addr.map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

impl From<TcpStream> for NetStream {
    fn from(stream: TcpStream) -> Self {
        NetStream::Plain { stream }
    }
}

impl From<ServerTlsStream<TcpStream>> for NetStream {
    fn from(stream: ServerTlsStream<TcpStream>) -> Self {
        NetStream::ServerTls { stream }
    }
}

impl From<ClientTlsStream<TcpStream>> for NetStream {
    fn from(stream: ClientTlsStream<TcpStream>) -> Self {
        NetStream::ClientTls { stream }
    }
}

impl From<DuplexStream> for NetStream {
    fn from(stream: DuplexStream) -> Self {
        NetStream::Memory { stream }
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            NetStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            NetStreamProj::ServerTls { stream } => stream.poll_read(cx, buf),
            NetStreamProj::ClientTls { stream } => stream.poll_read(cx, buf),
            NetStreamProj::Memory { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            NetStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            NetStreamProj::ServerTls { stream } => stream.poll_write(cx, buf),
            NetStreamProj::ClientTls { stream } => stream.poll_write(cx, buf),
            NetStreamProj::Memory { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            NetStreamProj::Plain { stream } => stream.poll_flush(cx),
            NetStreamProj::ServerTls { stream } => stream.poll_flush(cx),
            NetStreamProj::ClientTls { stream } => stream.poll_flush(cx),
            NetStreamProj::Memory { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            NetStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            NetStreamProj::ServerTls { stream } => stream.poll_shutdown(cx),
            NetStreamProj::ClientTls { stream } => stream.poll_shutdown(cx),
            NetStreamProj::Memory { stream } => stream.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream_identity() {
        let (a, _b) = tokio::io::duplex(64);
        let stream = NetStream::from(a);
        assert!(!stream.is_tls());
        assert_eq!(stream.transport_name(), "memory");
        assert_eq!(stream.network_id(), "memory");
    }

    #[tokio::test]
    async fn test_tcp_stream_identity() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();

        let stream = NetStream::from(client);
        assert_eq!(stream.transport_name(), "tcp-socket");
        assert_eq!(stream.network_id(), addr.to_string());
    }
}
