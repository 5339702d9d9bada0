//! Preferred-source route probe
//!
//! Asks the kernel which local IP it would use to reach a destination.
//! Absence of an answer is a first-class degraded mode, never an error:
//! the multi dialer just skips its route-match step.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

/// The local IP the kernel routing table prefers for reaching `remote`.
///
/// Connecting a datagram socket runs route selection without sending any
/// traffic; the socket's local address then carries the chosen source IP.
pub(crate) fn preferred_source(remote: SocketAddr) -> Option<IpAddr> {
    let wildcard: SocketAddr = if remote.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let probe = UdpSocket::bind(wildcard).ok()?;
    probe.connect(remote).ok()?;
    Some(probe.local_addr().ok()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_destination_prefers_loopback_source() {
        let source = preferred_source("127.0.0.1:4001".parse().unwrap());
        assert_eq!(source, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_v6_loopback_destination() {
        // Hosts without IPv6 report no route; both answers are acceptable.
        if let Some(source) = preferred_source("[::1]:4001".parse().unwrap()) {
            assert_eq!(source, IpAddr::V6(Ipv6Addr::LOCALHOST));
        }
    }
}
