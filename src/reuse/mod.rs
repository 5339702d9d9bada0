//! Port-reuse socket primitives
//!
//! Everything that touches `SO_REUSEADDR`/`SO_REUSEPORT` lives here: the
//! availability probe, listener construction, and the reuse-bind dial
//! primitive with its single ephemeral-port retry.

mod route;

pub(crate) use route::preferred_source;

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tracing::debug;

use crate::common::CancelToken;
use crate::error::{Error, Result};

const BACKLOG: i32 = 128;

/// Whether the running kernel supports load-balancing port reuse.
///
/// `SO_REUSEPORT` with the semantics this transport needs exists on Unix
/// kernels other than Solaris/illumos. When this returns false the
/// transport degrades: listens bypass reuse and every dialer is ephemeral.
pub(crate) fn available() -> bool {
    cfg!(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))
}

fn reuse_socket(domain: Domain, ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(domain, ty, Some(protocol))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Open a stream listener with port reuse enabled
pub(crate) fn listen_stream(addr: SocketAddr) -> Result<TcpListener> {
    let socket = reuse_socket(Domain::for_address(addr), Type::STREAM, Protocol::TCP)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// Open a datagram listener with port reuse enabled
pub(crate) fn listen_datagram(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = reuse_socket(Domain::for_address(addr), Type::DGRAM, Protocol::UDP)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Diagnose whether a reuse dial failure is worth one ephemeral retry.
///
/// Bind-layer failures (address in use, address not available) can succeed
/// from a different local endpoint; connect-layer failures (refused, timed
/// out) reflect the remote's state and a retry would only mask it.
/// Unclassified errors retry optimistically.
pub(crate) fn reuse_err_should_retry(err: &Error) -> bool {
    // Cancellation and other non-socket errors are never bind failures.
    let Error::Io(err) = err else { return false };
    match err.kind() {
        io::ErrorKind::TimedOut => false,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => true,
        io::ErrorKind::ConnectionRefused => false,
        _ => true,
    }
}

/// Dial a stream connection, binding the local end to `laddr` with port
/// reuse when a source is given.
///
/// A bind-retriable failure falls back to a single plain dial from an
/// ephemeral port, unless `cancel` has already fired, in which case the
/// original error surfaces.
pub(crate) async fn dial_stream(
    laddr: Option<SocketAddr>,
    raddr: SocketAddr,
    cancel: &CancelToken,
) -> Result<TcpStream> {
    let Some(laddr) = laddr else {
        return plain_dial_stream(raddr, cancel).await;
    };

    match bound_dial_stream(laddr, raddr, cancel).await {
        Err(err) if reuse_err_should_retry(&err) && !cancel.is_cancelled() => {
            debug!("failed to dial {} from {}, retrying with an ephemeral port", raddr, laddr);
            plain_dial_stream(raddr, cancel).await
        }
        res => res,
    }
}

/// Datagram equivalent of [`dial_stream`]; the returned socket is connected
/// to `raddr`.
pub(crate) async fn dial_datagram(
    laddr: Option<SocketAddr>,
    raddr: SocketAddr,
    cancel: &CancelToken,
) -> Result<UdpSocket> {
    let Some(laddr) = laddr else {
        return plain_dial_datagram(raddr, cancel).await;
    };

    match bound_dial_datagram(laddr, raddr, cancel).await {
        Err(err) if reuse_err_should_retry(&err) && !cancel.is_cancelled() => {
            debug!("failed to dial {} from {}, retrying with an ephemeral port", raddr, laddr);
            plain_dial_datagram(raddr, cancel).await
        }
        res => res,
    }
}

async fn bound_dial_stream(
    laddr: SocketAddr,
    raddr: SocketAddr,
    cancel: &CancelToken,
) -> Result<TcpStream> {
    let socket = reuse_socket(Domain::for_address(raddr), Type::STREAM, Protocol::TCP)?;
    socket.bind(&laddr.into())?;
    let socket = TcpSocket::from_std_stream(socket.into());
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = socket.connect(raddr) => Ok(res?),
    }
}

async fn plain_dial_stream(raddr: SocketAddr, cancel: &CancelToken) -> Result<TcpStream> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = TcpStream::connect(raddr) => Ok(res?),
    }
}

async fn bound_dial_datagram(
    laddr: SocketAddr,
    raddr: SocketAddr,
    cancel: &CancelToken,
) -> Result<UdpSocket> {
    let socket = reuse_socket(Domain::for_address(raddr), Type::DGRAM, Protocol::UDP)?;
    socket.bind(&laddr.into())?;
    let socket = UdpSocket::from_std(socket.into())?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = socket.connect(raddr) => {
            res?;
            Ok(socket)
        }
    }
}

async fn plain_dial_datagram(raddr: SocketAddr, cancel: &CancelToken) -> Result<UdpSocket> {
    let wildcard: SocketAddr = if raddr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(wildcard).await?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = socket.connect(raddr) => {
            res?;
            Ok(socket)
        }
    }
}
