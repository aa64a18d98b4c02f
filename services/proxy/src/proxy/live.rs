//! Live connection bookkeeping.
//!
//! Every accepted client is registered here until its tunnel finishes. The
//! set answers "how many clients are connected" for server list pings and
//! carries a kick channel per client for shutdown broadcasts.
//!
//! Removal is idempotent: the registration guard removes its entry on drop,
//! and a shutdown drain may already have taken it. A drain also closes the
//! set, so nothing registered afterwards can escape the shutdown kick.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct LiveClient {
    peer_addr: SocketAddr,
    kick_tx: oneshot::Sender<String>,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ConnectionId, LiveClient>,
    /// Set by `kick_all`; no registrations are accepted afterwards.
    closed: bool,
}

/// Set of currently open client tunnels.
#[derive(Default)]
pub struct LiveSet {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new client.
    ///
    /// The returned guard removes the entry when dropped; the receiver
    /// yields a kick reason if the client is kicked from outside its task.
    /// Returns `None` once the set has been closed by [`LiveSet::kick_all`].
    pub fn register(
        self: &Arc<Self>,
        peer_addr: SocketAddr,
    ) -> Option<(LiveGuard, oneshot::Receiver<String>)> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (kick_tx, kick_rx) = oneshot::channel();

        {
            let mut registry = self.registry();
            if registry.closed {
                return None;
            }
            registry.clients.insert(id, LiveClient { peer_addr, kick_tx });
        }
        debug!(conn_id = %id, peer_addr = %peer_addr, "Client registered");

        let guard = LiveGuard {
            live: Arc::clone(self),
            id,
        };
        Some((guard, kick_rx))
    }

    /// Remove a client. Returns whether it was still present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.registry().clients.remove(&id);
        if let Some(client) = &removed {
            debug!(conn_id = %id, peer_addr = %client.peer_addr, "Client removed");
        }
        removed.is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.registry().clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.registry().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().clients.is_empty()
    }

    /// Remove every client, ask each to kick itself with `reason` and close
    /// the set to new registrations.
    ///
    /// Returns the number of clients that were still listening.
    pub fn kick_all(&self, reason: &str) -> usize {
        let drained: Vec<(ConnectionId, LiveClient)> = {
            let mut registry = self.registry();
            registry.closed = true;
            registry.clients.drain().collect()
        };

        let mut notified = 0;
        for (id, client) in drained {
            debug!(conn_id = %id, peer_addr = %client.peer_addr, "Kick requested");
            if client.kick_tx.send(reason.to_string()).is_ok() {
                notified += 1;
            }
        }
        notified
    }
}

/// Registration handle. Dropping it removes the client from the set.
pub struct LiveGuard {
    live: Arc<LiveSet>,
    id: ConnectionId,
}

impl LiveGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.remove(self.id);
    }
}
