//! Per-family listener registry and memoized dialers
//!
//! One `Network` exists per address family. It tracks the live listeners
//! of each socket kind and memoizes the dialer built from them; any
//! registry mutation nils the matching memo inside the same write-lock
//! critical section, so a dialer can never outlive the snapshot it was
//! built from.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{Family, TransportProto};
use crate::dialer::Dialer;

/// Per-address-family transport state
#[derive(Debug)]
pub(crate) struct Network {
    shared: Arc<NetworkShared>,
}

impl Network {
    pub(crate) fn new(family: Family) -> Self {
        Self {
            shared: Arc::new(NetworkShared {
                family,
                state: RwLock::new(State::default()),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<NetworkShared> {
        &self.shared
    }
}

/// The state listeners hold a weak handle to
#[derive(Debug)]
pub(crate) struct NetworkShared {
    family: Family,
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    stream_listeners: HashMap<u64, SocketAddr>,
    datagram_listeners: HashMap<u64, SocketAddr>,
    stream_dialer: Option<Arc<Dialer>>,
    datagram_dialer: Option<Arc<Dialer>>,
}

impl State {
    fn listeners(&self, kind: TransportProto) -> &HashMap<u64, SocketAddr> {
        match kind {
            TransportProto::Tcp => &self.stream_listeners,
            TransportProto::Udp => &self.datagram_listeners,
        }
    }

    fn listeners_mut(&mut self, kind: TransportProto) -> &mut HashMap<u64, SocketAddr> {
        match kind {
            TransportProto::Tcp => &mut self.stream_listeners,
            TransportProto::Udp => &mut self.datagram_listeners,
        }
    }

    fn dialer(&self, kind: TransportProto) -> Option<&Arc<Dialer>> {
        match kind {
            TransportProto::Tcp => self.stream_dialer.as_ref(),
            TransportProto::Udp => self.datagram_dialer.as_ref(),
        }
    }

    fn dialer_mut(&mut self, kind: TransportProto) -> &mut Option<Arc<Dialer>> {
        match kind {
            TransportProto::Tcp => &mut self.stream_dialer,
            TransportProto::Udp => &mut self.datagram_dialer,
        }
    }
}

impl NetworkShared {
    /// Current dialer for `kind`, building and caching one when absent.
    ///
    /// Double-checked: read-locked fast path, write-locked slow path that
    /// re-checks before building, so concurrent callers after an
    /// invalidation agree on one dialer.
    pub(crate) fn dialer(&self, kind: TransportProto) -> Arc<Dialer> {
        {
            let state = self.state.read();
            if let Some(dialer) = state.dialer(kind) {
                return dialer.clone();
            }
        }

        let mut state = self.state.write();
        if let Some(dialer) = state.dialer(kind) {
            return dialer.clone();
        }
        let addrs: Vec<SocketAddr> = state.listeners(kind).values().copied().collect();
        let dialer = Arc::new(Dialer::for_listeners(self.family, &addrs));
        *state.dialer_mut(kind) = Some(dialer.clone());
        dialer
    }

    /// Register a bound listener and invalidate the matching dialer
    pub(crate) fn insert(&self, kind: TransportProto, id: u64, addr: SocketAddr) {
        let mut state = self.state.write();
        state.listeners_mut(kind).insert(id, addr);
        *state.dialer_mut(kind) = None;
    }

    /// Deregister a listener and invalidate the matching dialer
    pub(crate) fn remove(&self, kind: TransportProto, id: u64) {
        let mut state = self.state.write();
        state.listeners_mut(kind).remove(&id);
        *state.dialer_mut(kind) = None;
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, kind: TransportProto) -> usize {
        self.state.read().listeners(kind).len()
    }
}
