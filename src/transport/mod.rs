//! Port-reusing transport
//!
//! The transport listens on TCP or UDP endpoints and dials outbound
//! connections from the ports it is already listening on, so peers always
//! see the same publicly-reachable source address. Listen operations
//! register the bound port as a dial candidate; dial operations pick a
//! source per destination through a dialer memoized from the current
//! listener set.

pub(crate) mod network;

mod listener;

pub use listener::{Listener, PacketListener};

use tokio::net::{TcpListener, UdpSocket};
use tracing::debug;

use crate::common::{CancelToken, Conn, Family, Multiaddr, TransportProto};
use crate::error::{Error, Result};
use crate::reuse;
use crate::transport::listener::Registration;
use crate::transport::network::Network;

/// A port-reusing transport
///
/// `Transport::default()` is ready to use. One instance serves any number
/// of concurrent listen and dial operations; IPv4 and IPv6 state are kept
/// fully separate.
#[derive(Debug)]
pub struct Transport {
    v4: Network,
    v6: Network,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            v4: Network::new(Family::V4),
            v6: Network::new(Family::V6),
        }
    }
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    fn network(&self, family: Family) -> &Network {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    /// Listen for stream connections on `laddr`.
    ///
    /// With port reuse available the bound port becomes a source candidate
    /// for future dials from this transport. Listening on the same
    /// multiaddr any number of times is allowed; the kernel picks which
    /// listener receives each inbound connection.
    pub async fn listen(&self, laddr: &Multiaddr) -> Result<Listener> {
        let (proto, addr) = laddr.dial_args().ok_or(Error::WrongListenProto)?;
        if proto.transport() != TransportProto::Tcp {
            return Err(Error::WrongListenProto);
        }
        let network = self.network(proto.family());

        let inner = if reuse::available() {
            match reuse::listen_stream(addr) {
                Ok(listener) => listener,
                Err(err) => {
                    debug!("reuse listen on {} failed ({}), binding without reuse", laddr, err);
                    TcpListener::bind(addr).await?
                }
            }
        } else {
            TcpListener::bind(addr).await?
        };

        let local_addr = inner.local_addr()?;
        let id = listener::next_listener_id();
        let shared = network.shared();
        shared.insert(TransportProto::Tcp, id, local_addr);
        Ok(Listener::new(
            inner,
            local_addr,
            Registration::new(shared, TransportProto::Tcp, id),
        ))
    }

    /// Listen for datagrams on `laddr`; the UDP equivalent of
    /// [`listen`](Transport::listen).
    pub async fn listen_packet(&self, laddr: &Multiaddr) -> Result<PacketListener> {
        let (proto, addr) = laddr.dial_args().ok_or(Error::WrongListenPacketProto)?;
        if proto.transport() != TransportProto::Udp {
            return Err(Error::WrongListenPacketProto);
        }
        let network = self.network(proto.family());

        let inner = if reuse::available() {
            match reuse::listen_datagram(addr) {
                Ok(socket) => socket,
                Err(err) => {
                    debug!("reuse listen on {} failed ({}), binding without reuse", laddr, err);
                    UdpSocket::bind(addr).await?
                }
            }
        } else {
            UdpSocket::bind(addr).await?
        };

        let local_addr = inner.local_addr()?;
        let id = listener::next_listener_id();
        let shared = network.shared();
        shared.insert(TransportProto::Udp, id, local_addr);
        Ok(PacketListener::new(
            inner,
            local_addr,
            Registration::new(shared, TransportProto::Udp, id),
        ))
    }

    /// Dial `raddr`, reusing a listening port as the source if possible.
    ///
    /// The source port is chosen per destination: dialing a loopback
    /// address prefers loopback listeners, and a listener on the IP the
    /// kernel routes from is preferred over everything else.
    pub async fn dial(&self, raddr: &Multiaddr) -> Result<Conn> {
        self.dial_context(raddr, &CancelToken::new()).await
    }

    /// Like [`dial`](Transport::dial), but abortable through `cancel`.
    pub async fn dial_context(&self, raddr: &Multiaddr, cancel: &CancelToken) -> Result<Conn> {
        let (proto, addr) = raddr.dial_args().ok_or(Error::WrongDialProto)?;
        let network = self.network(proto.family());
        let dialer = network.shared().dialer(proto.transport());

        match proto.transport() {
            TransportProto::Tcp => {
                let stream = dialer.dial_stream(addr, cancel).await?;
                Conn::from_stream(stream, raddr.clone())
            }
            TransportProto::Udp => {
                let socket = dialer.dial_datagram(addr, cancel).await?;
                Conn::from_datagram(socket, raddr.clone())
            }
        }
    }
}
