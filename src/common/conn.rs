//! Connection wrappers
//!
//! [`Conn`] is the single connection type handed out by dials and accepts.
//! It reads and writes like any async stream regardless of whether a TCP
//! stream or a connected datagram socket sits underneath, and it remembers
//! the remote multiaddr it was created for.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

use crate::common::Multiaddr;
use crate::error::Result;

const DATAGRAM_RECV_BUFFER: usize = 65535;

/// A dialed or accepted connection
pub struct Conn {
    io: ConnIo,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    remote: Multiaddr,
}

enum ConnIo {
    Stream(TcpStream),
    Datagram(DatagramStream),
}

impl Conn {
    pub(crate) fn from_stream(stream: TcpStream, remote: Multiaddr) -> Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            io: ConnIo::Stream(stream),
            local_addr,
            peer_addr,
            remote,
        })
    }

    pub(crate) fn from_datagram(socket: UdpSocket, remote: Multiaddr) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        let peer_addr = socket.peer_addr()?;
        Ok(Self {
            io: ConnIo::Datagram(DatagramStream::new(socket)),
            local_addr,
            peer_addr,
            remote,
        })
    }

    /// Local endpoint of the connection
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote endpoint of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The multiaddr this connection was dialed to (or accepted from)
    pub fn remote_multiaddr(&self) -> &Multiaddr {
        &self.remote
    }

    /// The local endpoint as a multiaddr
    pub fn local_multiaddr(&self) -> Multiaddr {
        match &self.io {
            ConnIo::Stream(_) => Multiaddr::tcp(self.local_addr.ip(), self.local_addr.port()),
            ConnIo::Datagram(_) => Multiaddr::udp(self.local_addr.ip(), self.local_addr.port()),
        }
    }

    /// Set `SO_LINGER` on a stream connection.
    ///
    /// A linger of zero closes with a reset instead of TIME_WAIT, which is
    /// what allows re-dialing from the same source port right after a
    /// close. Has no effect on datagram connections.
    pub fn set_linger(&self, linger: Option<Duration>) -> Result<()> {
        match &self.io {
            ConnIo::Stream(stream) => Ok(stream.set_linger(linger)?),
            ConnIo::Datagram(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("local", &self.local_addr)
            .field("remote", &self.remote.to_string())
            .finish()
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.io {
            ConnIo::Stream(stream) => Pin::new(stream).poll_read(cx, buf),
            ConnIo::Datagram(dgram) => Pin::new(dgram).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.io {
            ConnIo::Stream(stream) => Pin::new(stream).poll_write(cx, buf),
            ConnIo::Datagram(dgram) => Pin::new(dgram).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.io {
            ConnIo::Stream(stream) => Pin::new(stream).poll_flush(cx),
            ConnIo::Datagram(_) => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.io {
            ConnIo::Stream(stream) => Pin::new(stream).poll_shutdown(cx),
            ConnIo::Datagram(_) => Poll::Ready(Ok(())),
        }
    }
}

/// Stream adapter over a connected datagram socket
///
/// Each write sends one datagram; reads drain one received datagram at a
/// time through an internal buffer so short reads don't drop the tail of a
/// message.
struct DatagramStream {
    socket: UdpSocket,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
}

impl DatagramStream {
    fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            read_buf: vec![0u8; DATAGRAM_RECV_BUFFER],
            read_pos: 0,
            read_len: 0,
        }
    }
}

impl AsyncRead for DatagramStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Drain buffered data first
        if this.read_pos < this.read_len {
            let remaining = this.read_len - this.read_pos;
            let to_copy = remaining.min(buf.remaining());
            buf.put_slice(&this.read_buf[this.read_pos..this.read_pos + to_copy]);
            this.read_pos += to_copy;
            return Poll::Ready(Ok(()));
        }

        let mut recv_buf = ReadBuf::new(&mut this.read_buf);
        match this.socket.poll_recv(cx, &mut recv_buf) {
            Poll::Ready(Ok(())) => {
                this.read_len = recv_buf.filled().len();
                let to_copy = this.read_len.min(buf.remaining());
                buf.put_slice(&this.read_buf[..to_copy]);
                this.read_pos = to_copy;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for DatagramStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stream_conn_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let remote = Multiaddr::tcp(addr.ip(), addr.port());
        let mut conn = Conn::from_stream(stream, remote.clone()).unwrap();

        assert_eq!(conn.peer_addr(), addr);
        assert_eq!(conn.remote_multiaddr(), &remote);
        let local = conn.local_addr();
        assert_eq!(conn.local_multiaddr(), Multiaddr::tcp(local.ip(), local.port()));

        conn.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_datagram_conn_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();
        let remote = Multiaddr::udp(server_addr.ip(), server_addr.port());
        let mut conn = Conn::from_datagram(client, remote).unwrap();

        conn.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, conn.local_addr());

        server.send_to(b"pong", from).await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_datagram_read_buffers_across_short_reads() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();
        let local = client.local_addr().unwrap();
        let remote = Multiaddr::udp(server_addr.ip(), server_addr.port());
        let mut conn = Conn::from_datagram(client, remote).unwrap();

        server.send_to(b"abcdef", local).await.unwrap();

        let mut first = [0u8; 2];
        conn.read_exact(&mut first).await.unwrap();
        let mut rest = [0u8; 4];
        conn.read_exact(&mut rest).await.unwrap();
        assert_eq!(&first, b"ab");
        assert_eq!(&rest, b"cdef");
    }
}
