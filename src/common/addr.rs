//! Multiaddress parsing and IP classification
//!
//! A [`Multiaddr`] is a self-describing composite address: a sequence of
//! protocol components such as `/ip4/127.0.0.1/tcp/4001`. The transport
//! only handles addresses that reduce to an IP component followed by a
//! `tcp` or `udp` component; anything else is rejected with the
//! wrong-proto errors at the operation that received it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// One component of a multiaddr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Tcp(u16),
    Udp(u16),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ip4(ip) => write!(f, "/ip4/{}", ip),
            Protocol::Ip6(ip) => write!(f, "/ip6/{}", ip),
            Protocol::Tcp(port) => write!(f, "/tcp/{}", port),
            Protocol::Udp(port) => write!(f, "/udp/{}", port),
        }
    }
}

/// Transport protocol of a reduced multiaddr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProto {
    Tcp,
    Udp,
}

/// Self-describing composite network address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Multiaddr {
    parts: Vec<Protocol>,
}

impl Multiaddr {
    /// Create a multiaddr from protocol components
    pub fn new(parts: Vec<Protocol>) -> Self {
        Self { parts }
    }

    /// Shorthand for `/ipX/<ip>/tcp/<port>`
    pub fn tcp(ip: IpAddr, port: u16) -> Self {
        Self::new(vec![ip_part(ip), Protocol::Tcp(port)])
    }

    /// Shorthand for `/ipX/<ip>/udp/<port>`
    pub fn udp(ip: IpAddr, port: u16) -> Self {
        Self::new(vec![ip_part(ip), Protocol::Udp(port)])
    }

    /// Build a multiaddr around an already-resolved socket address
    pub fn from_socket_addr(addr: SocketAddr, proto: TransportProto) -> Self {
        match proto {
            TransportProto::Tcp => Self::tcp(addr.ip(), addr.port()),
            TransportProto::Udp => Self::udp(addr.ip(), addr.port()),
        }
    }

    /// The protocol components, outermost first
    pub fn protocols(&self) -> &[Protocol] {
        &self.parts
    }

    /// Reduce to the concrete dial protocol and socket address.
    ///
    /// Only `ip4`/`ip6` followed by `tcp`/`udp` reduces; the caller maps
    /// `None` to the wrong-proto error of the operation it is performing.
    pub(crate) fn dial_args(&self) -> Option<(Proto, SocketAddr)> {
        match self.parts.as_slice() {
            [Protocol::Ip4(ip), Protocol::Tcp(port)] => {
                Some((Proto::Tcp4, SocketAddr::new((*ip).into(), *port)))
            }
            [Protocol::Ip4(ip), Protocol::Udp(port)] => {
                Some((Proto::Udp4, SocketAddr::new((*ip).into(), *port)))
            }
            [Protocol::Ip6(ip), Protocol::Tcp(port)] => {
                Some((Proto::Tcp6, SocketAddr::new((*ip).into(), *port)))
            }
            [Protocol::Ip6(ip), Protocol::Udp(port)] => {
                Some((Proto::Udp6, SocketAddr::new((*ip).into(), *port)))
            }
            _ => None,
        }
    }
}

fn ip_part(ip: IpAddr) -> Protocol {
    match ip {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

impl FromStr for Multiaddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(s.to_string());

        let mut segments = s.split('/');
        if segments.next() != Some("") {
            return Err(invalid());
        }

        let mut parts = Vec::new();
        while let Some(tag) = segments.next() {
            let value = segments.next().ok_or_else(invalid)?;
            let part = match tag {
                "ip4" => Protocol::Ip4(value.parse().map_err(|_| invalid())?),
                "ip6" => Protocol::Ip6(value.parse().map_err(|_| invalid())?),
                "tcp" => Protocol::Tcp(value.parse().map_err(|_| invalid())?),
                "udp" => Protocol::Udp(value.parse().map_err(|_| invalid())?),
                _ => return Err(invalid()),
            };
            parts.push(part);
        }
        if parts.is_empty() {
            return Err(invalid());
        }

        Ok(Multiaddr::new(parts))
    }
}

/// Concrete protocol a multiaddr reduces to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Proto {
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
}

impl Proto {
    pub(crate) fn family(self) -> Family {
        match self {
            Proto::Tcp4 | Proto::Udp4 => Family::V4,
            Proto::Tcp6 | Proto::Udp6 => Family::V6,
        }
    }

    pub(crate) fn transport(self) -> TransportProto {
        match self {
            Proto::Tcp4 | Proto::Tcp6 => TransportProto::Tcp,
            Proto::Udp4 | Proto::Udp6 => TransportProto::Udp,
        }
    }
}

/// IP address family of a per-family network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Family {
    V4,
    V6,
}

impl Family {
    /// The wildcard IP for this family (`0.0.0.0` or `::`)
    pub(crate) fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// Whether `ip` is a globally routable unicast address.
///
/// Everything that is not unspecified, loopback, multicast, link-local or
/// (v4) broadcast counts, private ranges included.
pub(crate) fn is_global_unicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !v4.is_unspecified()
                && !v4.is_loopback()
                && !v4.is_multicast()
                && !v4.is_broadcast()
                && !v4.is_link_local()
        }
        IpAddr::V6(v6) => {
            !v6.is_unspecified()
                && !v6.is_loopback()
                && !v6.is_multicast()
                && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp4() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(
            addr.protocols(),
            &[Protocol::Ip4(Ipv4Addr::LOCALHOST), Protocol::Tcp(4001)]
        );

        let (proto, sa) = addr.dial_args().unwrap();
        assert_eq!(proto, Proto::Tcp4);
        assert_eq!(sa, "127.0.0.1:4001".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_parse_udp6() {
        let addr: Multiaddr = "/ip6/::1/udp/0".parse().unwrap();
        let (proto, sa) = addr.dial_args().unwrap();
        assert_eq!(proto, Proto::Udp6);
        assert_eq!(sa.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn test_display_round_trip() {
        for s in [
            "/ip4/0.0.0.0/tcp/0",
            "/ip4/192.168.1.7/udp/1234",
            "/ip6/::/tcp/80",
            "/ip6/::1/udp/443",
            "/tcp/80",
        ] {
            let addr: Multiaddr = s.parse().unwrap();
            assert_eq!(addr.to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for s in [
            "",
            "/",
            "ip4/127.0.0.1/tcp/80",
            "/ip4/127.0.0.1/tcp",
            "/ip4/127.0.0.1/quic/80",
            "/ip4/::1/tcp/80",
            "/ip6/127.0.0.1/tcp/80",
            "/ip4/not-an-ip/tcp/80",
            "/ip4/127.0.0.1/tcp/99999",
        ] {
            assert!(s.parse::<Multiaddr>().is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn test_unreducible_addrs() {
        for s in ["/tcp/80", "/ip4/127.0.0.1", "/ip4/127.0.0.1/tcp/80/udp/90"] {
            let addr: Multiaddr = s.parse().unwrap();
            assert!(addr.dial_args().is_none(), "reduced {:?}", s);
        }
    }

    #[test]
    fn test_constructors() {
        let tcp = Multiaddr::tcp("127.0.0.1".parse().unwrap(), 80);
        assert_eq!(tcp.to_string(), "/ip4/127.0.0.1/tcp/80");

        let udp = Multiaddr::udp("::1".parse().unwrap(), 443);
        assert_eq!(udp.to_string(), "/ip6/::1/udp/443");

        let sa: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let from_sa = Multiaddr::from_socket_addr(sa, TransportProto::Udp);
        assert_eq!(from_sa.dial_args().unwrap().1, sa);
    }

    #[test]
    fn test_global_unicast_v4() {
        assert!(is_global_unicast("8.8.8.8".parse().unwrap()));
        assert!(is_global_unicast("10.1.2.3".parse().unwrap()));
        assert!(!is_global_unicast("127.0.0.1".parse().unwrap()));
        assert!(!is_global_unicast("0.0.0.0".parse().unwrap()));
        assert!(!is_global_unicast("224.0.0.1".parse().unwrap()));
        assert!(!is_global_unicast("255.255.255.255".parse().unwrap()));
        assert!(!is_global_unicast("169.254.1.1".parse().unwrap()));
    }

    #[test]
    fn test_global_unicast_v6() {
        assert!(is_global_unicast("2001:db8::1".parse().unwrap()));
        assert!(!is_global_unicast("::1".parse().unwrap()));
        assert!(!is_global_unicast("::".parse().unwrap()));
        assert!(!is_global_unicast("ff02::1".parse().unwrap()));
        assert!(!is_global_unicast("fe80::1".parse().unwrap()));
    }
}
