//! Portreuse - a port-reusing TCP/UDP transport for peer-to-peer networking
//!
//! Dialing out from the same local ports a process is listening on gives
//! peers a stable, publicly-reachable source address, which is what makes
//! endpoint-consistent NAT traversal work. This crate couples listeners
//! and dialers so the right source port is chosen per destination, safely
//! under concurrent listen, close and dial.
//!
//! # Architecture
//!
//! ```text
//! Transport (façade: listen / listen_packet / dial)
//! → Network (per family: listener registry + memoized dialer)
//! → Dialer (Default / Single / Multi source policy)
//! → reuse-bind primitive (SO_REUSEADDR + SO_REUSEPORT, one retry)
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Multiaddr, CancelToken, Conn
//! ├── transport/       # Façade, per-family registry, listener records
//! ├── dialer/          # Source-address selection policies
//! └── reuse/           # Reuse sockets, retry classification, route probe
//! ```
//!
//! # Example
//!
//! ```no_run
//! use portreuse::{Multiaddr, Transport};
//!
//! # async fn run() -> portreuse::Result<()> {
//! let transport = Transport::new();
//! let listener = transport.listen(&"/ip4/0.0.0.0/tcp/4001".parse()?).await?;
//!
//! // Dials from port 4001, so the peer sees our listening address.
//! let addr: Multiaddr = "/ip4/203.0.113.5/tcp/4001".parse()?;
//! let conn = transport.dial(&addr).await?;
//! # drop((listener, conn));
//! # Ok(())
//! # }
//! ```

// Core types
pub mod common;
pub mod error;

// Transport surface
pub mod transport;

// Internal machinery
mod dialer;
mod reuse;

// Re-exports for convenience
pub use common::{CancelToken, Conn, Multiaddr, Protocol, TransportProto};
pub use error::{Error, Result};
pub use transport::{Listener, PacketListener, Transport};
