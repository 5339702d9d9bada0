//! Error types for the port-reusing transport

use std::net::IpAddr;

use thiserror::Error;

/// Main error type for the transport
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid multiaddr: {0}")]
    InvalidAddress(String),

    #[error("Can only listen on tcp4 and tcp6 multiaddrs")]
    WrongListenProto,

    #[error("Can only listen on udp4 and udp6 multiaddrs")]
    WrongListenPacketProto,

    #[error("Can only dial tcp4, tcp6, udp4 and udp6 multiaddrs")]
    WrongDialProto,

    #[error("Undialable IP: {0}")]
    Undialable(IpAddr),

    #[error("Dial cancelled")]
    Cancelled,
}

/// Result type alias for the transport
pub type Result<T> = std::result::Result<T, Error>;
