//! Outbound dialers
//!
//! A dialer captures the source-address policy for one family and socket
//! kind, built from a snapshot of the listener set. The transport caches
//! one per (family, kind) and throws it away whenever the set changes.

mod multi;

pub(crate) use multi::MultiDialer;

use std::net::SocketAddr;

use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::common::{CancelToken, Family};
use crate::error::Result;
use crate::reuse;

/// Source-address policy for outbound connections
#[derive(Debug)]
pub(crate) enum Dialer {
    /// OS-chosen ephemeral local port
    Default,
    /// Every outbound socket binds the one listening port (wildcard IP)
    Single(SocketAddr),
    /// Per-destination selection across several listening ports
    Multi(MultiDialer),
}

impl Dialer {
    /// Build the dialer matching the current listener snapshot.
    ///
    /// No listeners means ephemeral dials; one distinct listening port is
    /// pinned for every dial; several distinct ports hand the choice to
    /// the multi dialer.
    pub(crate) fn for_listeners(family: Family, addrs: &[SocketAddr]) -> Dialer {
        if !reuse::available() {
            debug!("port reuse not available, dialing from ephemeral ports");
            return Dialer::Default;
        }

        // How many distinct ports are we listening on.
        let mut port = 0u16;
        for addr in addrs {
            match addr.port() {
                0 => {} // unbound entry; the registry only stores bound addresses
                p if port == 0 => port = p,
                p if p == port => {}
                _ => {
                    return Dialer::Multi(MultiDialer::new(
                        family.unspecified(),
                        addrs.to_vec(),
                    ))
                }
            }
        }

        if port == 0 {
            return Dialer::Default;
        }
        Dialer::Single(SocketAddr::new(family.unspecified(), port))
    }

    pub(crate) async fn dial_stream(
        &self,
        raddr: SocketAddr,
        cancel: &CancelToken,
    ) -> Result<TcpStream> {
        match self {
            Dialer::Default => reuse::dial_stream(None, raddr, cancel).await,
            Dialer::Single(laddr) => reuse::dial_stream(Some(*laddr), raddr, cancel).await,
            Dialer::Multi(multi) => multi.dial_stream(raddr, cancel).await,
        }
    }

    pub(crate) async fn dial_datagram(
        &self,
        raddr: SocketAddr,
        cancel: &CancelToken,
    ) -> Result<UdpSocket> {
        match self {
            Dialer::Default => reuse::dial_datagram(None, raddr, cancel).await,
            Dialer::Single(laddr) => reuse::dial_datagram(Some(*laddr), raddr, cancel).await,
            Dialer::Multi(multi) => multi.dial_datagram(raddr, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(specs: &[&str]) -> Vec<SocketAddr> {
        specs.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_no_listeners_is_default() {
        if !reuse::available() {
            return;
        }
        assert!(matches!(
            Dialer::for_listeners(Family::V4, &[]),
            Dialer::Default
        ));
    }

    #[test]
    fn test_single_port_pins_wildcard() {
        if !reuse::available() {
            return;
        }
        let dialer = Dialer::for_listeners(Family::V4, &addrs(&["127.0.0.1:4001"]));
        match dialer {
            Dialer::Single(laddr) => {
                assert_eq!(laddr, "0.0.0.0:4001".parse().unwrap());
            }
            other => panic!("expected single dialer, got {:?}", other),
        }
    }

    #[test]
    fn test_same_port_on_many_ips_is_still_single() {
        if !reuse::available() {
            return;
        }
        let dialer = Dialer::for_listeners(
            Family::V4,
            &addrs(&["127.0.0.1:4001", "0.0.0.0:4001", "192.168.1.5:4001"]),
        );
        assert!(matches!(dialer, Dialer::Single(_)));
    }

    #[test]
    fn test_distinct_ports_build_multi() {
        if !reuse::available() {
            return;
        }
        let dialer =
            Dialer::for_listeners(Family::V4, &addrs(&["127.0.0.1:4001", "127.0.0.1:4002"]));
        assert!(matches!(dialer, Dialer::Multi(_)));
    }

    #[test]
    fn test_v6_single_uses_v6_wildcard() {
        if !reuse::available() {
            return;
        }
        let dialer = Dialer::for_listeners(Family::V6, &addrs(&["[::1]:4001"]));
        match dialer {
            Dialer::Single(laddr) => assert_eq!(laddr, "[::]:4001".parse().unwrap()),
            other => panic!("expected single dialer, got {:?}", other),
        }
    }
}
