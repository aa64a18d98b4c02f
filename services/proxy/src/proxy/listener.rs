//! TCP listener and connection handling.
//!
//! Accepts client connections, registers each in the live set and runs a
//! [`ClientTunnel`] for it in its own task. One task per connection replaces
//! per-socket callbacks; bytes within one direction stay ordered because each
//! direction is a single sequential copy loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use super::client::{ClientTunnel, ServerStatus, SharedStatus, TunnelContext, TunnelSettings};
use super::live::{ConnectionId, LiveSet};
use super::router::SharedRouter;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 25565;

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Kick reason broadcast on shutdown.
pub const SHUTDOWN_REASON: &str = "Proxy shutting down";

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-tunnel timeouts.
    pub tunnel: TunnelSettings,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            tunnel: TunnelSettings::default(),
        }
    }
}

/// Front door of the proxy.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    /// Shared state handed to every tunnel.
    context: TunnelContext,
    /// Flips to `true` once [`Listener::terminate`] runs.
    shutdown: watch::Sender<bool>,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(
        config: ListenerConfig,
        router: SharedRouter,
        status: SharedStatus,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            context: TunnelContext {
                router,
                status,
                live: Arc::new(LiveSet::new()),
                settings: config.tunnel,
            },
            shutdown,
        })
    }

    /// Bind with the default server status.
    pub async fn bind_default(config: ListenerConfig, router: SharedRouter) -> io::Result<Self> {
        let status = Arc::new(ArcSwap::from_pointee(ServerStatus::default()));
        Self::bind(config, router, status).await
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> &SharedRouter {
        &self.context.router
    }

    pub fn status(&self) -> &SharedStatus {
        &self.context.status
    }

    /// Number of currently open client connections.
    pub fn live_count(&self) -> usize {
        self.context.live.len()
    }

    /// Whether a connection is still in the live set.
    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.context.live.contains(id)
    }

    /// Drop a connection from the live set. Safe to call repeatedly.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.context.live.remove(id)
    }

    /// Kick every live client with `reason` and stop accepting.
    ///
    /// The live set is empty when this returns. Returns the number of
    /// clients that were notified.
    pub fn terminate(&self, reason: &str) -> usize {
        self.shutdown.send_replace(true);
        let notified = self.context.live.kick_all(reason);
        info!(notified = notified, reason = %reason, "Listener terminated");
        notified
    }

    pub fn is_terminated(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run the listener, accepting and handling connections until
    /// [`Listener::terminate`] is called.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        let mut shutdown = self.shutdown.subscribe();
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => continue,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.spawn_tunnel(stream, peer_addr),
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        info!(bind_addr = %local_addr, "Listener stopped");
        Ok(())
    }

    fn spawn_tunnel(&self, stream: TcpStream, peer_addr: SocketAddr) {
        // Try to acquire a permit
        let permit = match self.conn_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                return;
            }
        };

        // Registration and terminate's drain share the live-set lock.
        let Some((guard, kick_rx)) = self.context.live.register(peer_addr) else {
            debug!(peer_addr = %peer_addr, "Connection dropped: listener terminated");
            return;
        };
        stream.set_nodelay(true).ok();

        let id = guard.id();
        let context = self.context.clone();
        info!(conn_id = %id, peer_addr = %peer_addr, "Incoming connection");

        tokio::spawn(
            async move {
                let mut tunnel = ClientTunnel::new(id, stream, context, kick_rx);
                if let Err(e) = tunnel.run().await {
                    debug!(error = %e, reason_code = e.reason_code(), "Connection error");
                }

                drop(guard);
                drop(permit);
            }
            .instrument(tracing::info_span!("connection", id = %id, peer = %peer_addr)),
        );
    }
}
