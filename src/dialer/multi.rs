//! Per-destination source selection across several listening ports
//!
//! Selection preference, in order:
//! * a listener on the exact IP the kernel would route from towards the
//!   destination;
//! * a random loopback listener, when the destination is loopback;
//! * a random unspecified-IP listener;
//! * the fallback wildcard IP with the first global listener's port.

use std::net::{IpAddr, SocketAddr};

use rand::seq::SliceRandom;
use tokio::net::{TcpStream, UdpSocket};
use tracing::warn;

use crate::common::{is_global_unicast, CancelToken};
use crate::error::{Error, Result};
use crate::reuse;

/// Dialer over several distinct listening ports
#[derive(Debug)]
pub(crate) struct MultiDialer {
    /// Every candidate listener address, scanned for route matches
    addresses: Vec<SocketAddr>,
    loopback: Vec<SocketAddr>,
    unspecified: Vec<SocketAddr>,
    /// Port of the first global-unicast listener, 0 when there is none
    global_port: u16,
    fallback: IpAddr,
}

impl MultiDialer {
    pub(crate) fn new(fallback: IpAddr, addresses: Vec<SocketAddr>) -> Self {
        let mut loopback = Vec::new();
        let mut unspecified = Vec::new();
        let mut global_port = 0u16;

        for addr in &addresses {
            let ip = addr.ip();
            if ip.is_loopback() {
                loopback.push(*addr);
            } else if ip.is_unspecified() {
                unspecified.push(*addr);
            } else if is_global_unicast(ip) {
                // The first global listener sets the fallback port; later
                // ones are not used for synthesized sources.
                if global_port == 0 {
                    global_port = addr.port();
                } else {
                    warn!(
                        "multiple global listeners, dialing from port {} and ignoring {}",
                        global_port, addr
                    );
                }
            }
        }

        Self {
            addresses,
            loopback,
            unspecified,
            global_port,
            fallback,
        }
    }

    /// Choose the source address for dialing `dest`.
    ///
    /// `route_source` is the kernel's preferred source IP towards `dest`,
    /// when route information is available.
    fn select_source(&self, dest: IpAddr, route_source: Option<IpAddr>) -> Result<SocketAddr> {
        if !dest.is_loopback() && !is_global_unicast(dest) {
            return Err(Error::Undialable(dest));
        }

        // A listener on the kernel's egress IP gives the peer the same
        // mapping it would see dialing us back.
        if let Some(source) = route_source {
            if let Some(addr) = self.addresses.iter().find(|a| a.ip() == source) {
                return Ok(*addr);
            }
        }

        if dest.is_loopback() {
            if let Some(addr) = pick(&self.loopback) {
                return Ok(addr);
            }
        }

        if let Some(addr) = pick(&self.unspecified) {
            return Ok(addr);
        }
        Ok(SocketAddr::new(self.fallback, self.global_port))
    }

    pub(crate) async fn dial_stream(
        &self,
        raddr: SocketAddr,
        cancel: &CancelToken,
    ) -> Result<TcpStream> {
        let source = self.select_source(raddr.ip(), reuse::preferred_source(raddr))?;
        reuse::dial_stream(Some(source), raddr, cancel).await
    }

    pub(crate) async fn dial_datagram(
        &self,
        raddr: SocketAddr,
        cancel: &CancelToken,
    ) -> Result<UdpSocket> {
        let source = self.select_source(raddr.ip(), reuse::preferred_source(raddr))?;
        reuse::dial_datagram(Some(source), raddr, cancel).await
    }
}

fn pick(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs.choose(&mut rand::thread_rng()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn dialer(addrs: &[&str]) -> MultiDialer {
        MultiDialer::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            addrs.iter().map(|s| s.parse().unwrap()).collect(),
        )
    }

    #[test]
    fn test_rejects_undialable_destinations() {
        let d = dialer(&["127.0.0.1:4001", "10.0.0.1:4002"]);
        for dest in ["224.0.0.1", "0.0.0.0", "255.255.255.255", "169.254.1.1"] {
            let err = d.select_source(dest.parse().unwrap(), None).unwrap_err();
            assert!(matches!(err, Error::Undialable(_)), "accepted {}", dest);
        }
    }

    #[test]
    fn test_route_match_wins() {
        let d = dialer(&["127.0.0.1:4001", "10.0.0.1:4002", "0.0.0.0:4003"]);
        let source = d
            .select_source("8.8.8.8".parse().unwrap(), Some("10.0.0.1".parse().unwrap()))
            .unwrap();
        assert_eq!(source, "10.0.0.1:4002".parse().unwrap());
    }

    #[test]
    fn test_loopback_dest_picks_loopback_listener() {
        let d = dialer(&["127.0.0.1:4001", "127.0.0.1:4002", "0.0.0.0:4003"]);
        for _ in 0..20 {
            let source = d.select_source("127.0.0.1".parse().unwrap(), None).unwrap();
            assert!(source.ip().is_loopback());
            assert!(source.port() == 4001 || source.port() == 4002);
        }
    }

    #[test]
    fn test_global_dest_picks_unspecified_listener() {
        let d = dialer(&["127.0.0.1:4001", "0.0.0.0:4002"]);
        let source = d.select_source("8.8.8.8".parse().unwrap(), None).unwrap();
        assert_eq!(source, "0.0.0.0:4002".parse().unwrap());
    }

    #[test]
    fn test_loopback_dest_without_loopback_listener() {
        let d = dialer(&["0.0.0.0:4002", "10.0.0.1:4005"]);
        let source = d.select_source("127.0.0.1".parse().unwrap(), None).unwrap();
        assert_eq!(source, "0.0.0.0:4002".parse().unwrap());
    }

    #[test]
    fn test_fallback_synthesizes_source_from_first_global_port() {
        let d = dialer(&["10.0.0.1:4005", "10.0.0.2:4006"]);
        let source = d.select_source("8.8.8.8".parse().unwrap(), None).unwrap();
        assert_eq!(source, "0.0.0.0:4005".parse().unwrap());
    }

    #[test]
    fn test_fallback_without_any_usable_listener() {
        let d = dialer(&[]);
        let source = d.select_source("8.8.8.8".parse().unwrap(), None).unwrap();
        assert_eq!(source, "0.0.0.0:0".parse().unwrap());
    }

    #[test]
    fn test_route_miss_falls_through() {
        let d = dialer(&["127.0.0.1:4001", "0.0.0.0:4002"]);
        let source = d
            .select_source(
                "8.8.8.8".parse().unwrap(),
                Some("192.168.9.9".parse().unwrap()),
            )
            .unwrap();
        assert_eq!(source, "0.0.0.0:4002".parse().unwrap());
    }
}
