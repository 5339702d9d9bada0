//! Listener records
//!
//! A record owns its socket and knows how to take itself out of the
//! transport's registry. Deregistration happens in `Drop` *before* the
//! socket field is released, which keeps the close ordering the registry
//! relies on: remove from the set, nil the memoized dialer, then close the
//! OS handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::net::{TcpListener, UdpSocket};

use crate::common::{Conn, Multiaddr, TransportProto};
use crate::error::Result;
use crate::transport::network::NetworkShared;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_listener_id() -> u64 {
    NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Registry membership of one listener record
#[derive(Debug)]
pub(crate) struct Registration {
    network: Weak<NetworkShared>,
    kind: TransportProto,
    id: u64,
}

impl Registration {
    pub(crate) fn new(network: &Arc<NetworkShared>, kind: TransportProto, id: u64) -> Self {
        Self {
            network: Arc::downgrade(network),
            kind,
            id,
        }
    }

    fn deregister(&self) {
        if let Some(network) = self.network.upgrade() {
            network.remove(self.kind, self.id);
        }
    }
}

/// A live stream listener
///
/// While alive, its port is a dial candidate for the owning transport.
/// Dropping (or closing) the listener removes it from the registry and
/// invalidates the cached dialer before the socket closes.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    registration: Registration,
}

impl Listener {
    pub(crate) fn new(inner: TcpListener, local_addr: SocketAddr, registration: Registration) -> Self {
        Self {
            inner,
            local_addr,
            registration,
        }
    }

    /// Accept one inbound connection
    pub async fn accept(&self) -> Result<Conn> {
        let (stream, peer) = self.inner.accept().await?;
        Conn::from_stream(stream, Multiaddr::tcp(peer.ip(), peer.port()))
    }

    /// The bound local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound local address as a multiaddr
    pub fn local_multiaddr(&self) -> Multiaddr {
        Multiaddr::tcp(self.local_addr.ip(), self.local_addr.port())
    }

    /// Close the listener, deregistering its port from the transport
    pub fn close(self) {}
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.registration.deregister();
    }
}

/// A live datagram listener
#[derive(Debug)]
pub struct PacketListener {
    inner: UdpSocket,
    local_addr: SocketAddr,
    registration: Registration,
}

impl PacketListener {
    pub(crate) fn new(inner: UdpSocket, local_addr: SocketAddr, registration: Registration) -> Self {
        Self {
            inner,
            local_addr,
            registration,
        }
    }

    /// Receive one datagram
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.inner.recv_from(buf).await?)
    }

    /// Send one datagram to `target`
    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.inner.send_to(buf, target).await?)
    }

    /// The bound local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound local address as a multiaddr
    pub fn local_multiaddr(&self) -> Multiaddr {
        Multiaddr::udp(self.local_addr.ip(), self.local_addr.port())
    }

    /// Close the listener, deregistering its port from the transport
    pub fn close(self) {}
}

impl Drop for PacketListener {
    fn drop(&mut self) {
        self.registration.deregister();
    }
}
