//! Client side of a proxied connection.
//!
//! A client tunnel owns the inbound connection for its whole life:
//! - Buffers the opening bytes until they form a complete packet
//! - Answers server list pings itself, without touching a backend
//! - Routes handshakes and binds a [`BackendTunnel`]
//! - Relays raw bytes in both directions once bound
//!
//! ```text
//! AwaitingHeader -> AwaitingHandshakeBody -> Bound -> Relaying -> Closed
//!        |                   |                 |          |
//!        +-> AwaitingStatusDone -> Closed      +----------+-> Kicked -> Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info};

use super::backend::{pump, BackendTunnel, DEFAULT_CONNECT_TIMEOUT};
use super::codec::{self, CodecError, Packet, Sniffed, TAG_HANDSHAKE};
use super::live::{ConnectionId, LiveSet};
use super::router::SharedRouter;
use crate::error::TunnelError;

/// Default time a client gets to send its opening packet.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for delivering a disconnect packet.
pub const DEFAULT_KICK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default message of the day for server list pings.
pub const DEFAULT_MOTD: &str = "Minecraft VirtualHost Proxy";

/// Default advertised player capacity.
pub const DEFAULT_CAPACITY: u32 = 10;

/// Field separator in server list responses.
const STATUS_DELIMITER: char = '\u{00A7}';

/// Initial capacity of the opening-packet buffer.
const OPENING_BUFFER_SIZE: usize = 512;

/// What the proxy reports to server list pings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub motd: String,
    pub capacity: u32,
}

impl ServerStatus {
    pub fn new(motd: impl Into<String>, capacity: u32) -> Self {
        Self {
            motd: motd.into(),
            capacity,
        }
    }

    /// Response string for a ping arriving while `live` clients are open.
    ///
    /// The pinging connection is itself live, so it is left out of the count.
    pub fn response(&self, live: usize) -> String {
        format!(
            "{motd}{d}{online}{d}{capacity}",
            motd = self.motd,
            d = STATUS_DELIMITER,
            online = live.saturating_sub(1),
            capacity = self.capacity,
        )
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::new(DEFAULT_MOTD, DEFAULT_CAPACITY)
    }
}

/// Server status shared with every tunnel, swapped on reload.
pub type SharedStatus = Arc<ArcSwap<ServerStatus>>;

/// Timeouts applied to each tunnel.
#[derive(Debug, Clone, Copy)]
pub struct TunnelSettings {
    /// Limit for receiving the opening packet. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Limit for connecting to the backend.
    pub connect_timeout: Duration,
    /// Limit for writing a disconnect packet to a client that is not reading.
    pub kick_timeout: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            kick_timeout: DEFAULT_KICK_TIMEOUT,
        }
    }
}

/// Everything a tunnel needs from the listener.
#[derive(Clone)]
pub struct TunnelContext {
    pub router: SharedRouter,
    pub status: SharedStatus,
    pub live: Arc<LiveSet>,
    pub settings: TunnelSettings,
}

/// Lifecycle of a client tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Waiting for the packet tag (and, for handshakes, the length prefix).
    AwaitingHeader,
    /// Handshake length known, waiting for the body.
    AwaitingHandshakeBody,
    /// Answering a server list ping.
    AwaitingStatusDone,
    /// Routed; backend connect in progress.
    Bound,
    /// Raw relay between client and backend.
    Relaying,
    /// Disconnect packet sent.
    Kicked,
    /// Done.
    Closed,
}

enum Opening {
    Sniffed(Sniffed),
    PeerClosed,
    Kicked(String),
}

enum Connect {
    Connected(BackendTunnel),
    Kicked(String),
}

enum RelayEnd {
    ClientClosed(std::io::Result<u64>),
    BackendClosed(std::io::Result<u64>),
    Kicked(String),
}

/// Inbound leg of a proxied connection.
pub struct ClientTunnel<S> {
    id: ConnectionId,
    stream: S,
    buffer: BytesMut,
    state: TunnelState,
    context: TunnelContext,
    kick_rx: Option<oneshot::Receiver<String>>,
}

impl<S> ClientTunnel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: ConnectionId,
        stream: S,
        context: TunnelContext,
        kick_rx: oneshot::Receiver<String>,
    ) -> Self {
        Self {
            id,
            stream,
            buffer: BytesMut::with_capacity(OPENING_BUFFER_SIZE),
            state: TunnelState::AwaitingHeader,
            context,
            kick_rx: Some(kick_rx),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    fn set_state(&mut self, state: TunnelState) {
        if self.state != state {
            debug!(conn_id = %self.id, from = ?self.state, to = ?state, "Tunnel state");
            self.state = state;
        }
    }

    /// Drive the connection until it closes.
    ///
    /// Errors that map to a kick reason are reported to the client before
    /// the connection is closed; the error is still returned for logging.
    pub async fn run(&mut self) -> Result<(), TunnelError> {
        let result = self.drive().await;

        if let Err(e) = &result {
            if let Some(reason) = e.kick_reason() {
                debug!(error = %e, reason_code = e.reason_code(), "Tunnel failed");
                self.kick(reason).await;
            }
        }
        self.set_state(TunnelState::Closed);
        result
    }

    async fn drive(&mut self) -> Result<(), TunnelError> {
        let (routing, consumed) = match self.read_opening().await? {
            Opening::Sniffed(Sniffed::StatusQuery) => return self.answer_status().await,
            Opening::Sniffed(Sniffed::Handshake { routing, consumed }) => (routing, consumed),
            Opening::PeerClosed => {
                debug!("Client closed connection before handshake");
                return Ok(());
            }
            Opening::Kicked(reason) => {
                self.kick(&reason).await;
                return Ok(());
            }
        };

        let target = self
            .context
            .router
            .route(&routing)
            .ok_or_else(|| TunnelError::RoutingFailure(routing.clone()))?;

        info!(routing = %routing, backend = %target, "Forwarding client");
        self.set_state(TunnelState::Bound);

        let connect = BackendTunnel::connect(target, &routing, self.context.settings.connect_timeout);
        let outcome = tokio::select! {
            result = connect => Connect::Connected(result?),
            reason = kick_requested(&mut self.kick_rx) => Connect::Kicked(reason),
        };
        let mut backend = match outcome {
            Connect::Connected(backend) => backend,
            Connect::Kicked(reason) => {
                self.kick(&reason).await;
                return Ok(());
            }
        };

        // Bytes the client sent after its handshake follow the replayed one.
        let pending = self.buffer.split_off(consumed);
        self.buffer = BytesMut::new();
        if let Err(e) = backend.send(&pending).await {
            debug!(error = %e, "Backend write failed before relay");
            return Ok(());
        }

        self.set_state(TunnelState::Relaying);
        self.relay(backend).await;
        Ok(())
    }

    /// Read until the buffered bytes form a complete opening packet.
    async fn read_opening(&mut self) -> Result<Opening, TunnelError> {
        let deadline = self
            .context
            .settings
            .handshake_timeout
            .map(|limit| Instant::now() + limit);
        let timer = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timer);

        loop {
            match codec::sniff(&self.buffer) {
                Ok(sniffed) => return Ok(Opening::Sniffed(sniffed)),
                Err(CodecError::UnexpectedPacket(tag)) => {
                    return Err(TunnelError::ProtocolViolation(tag))
                }
                Err(CodecError::IncompleteFrame) => {}
            }

            if self.buffer.first() == Some(&TAG_HANDSHAKE) && self.buffer.len() >= 3 {
                self.set_state(TunnelState::AwaitingHandshakeBody);
            }

            let n = tokio::select! {
                read = self.stream.read_buf(&mut self.buffer) => read?,
                reason = kick_requested(&mut self.kick_rx) => return Ok(Opening::Kicked(reason)),
                _ = &mut timer => return Err(TunnelError::HandshakeTimeout),
            };
            if n == 0 {
                return Ok(Opening::PeerClosed);
            }
        }
    }

    /// Reply to a server list ping and close.
    async fn answer_status(&mut self) -> Result<(), TunnelError> {
        self.set_state(TunnelState::AwaitingStatusDone);
        info!("Received server list query");

        let response = self
            .context
            .status
            .load()
            .response(self.context.live.len());
        self.stream
            .write_all(&Packet::disconnect(response).encode())
            .await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Send a disconnect packet and close the client connection.
    pub async fn kick(&mut self, reason: &str) {
        info!(reason = %reason, "Kicking client");
        self.set_state(TunnelState::Kicked);

        write_disconnect(&mut self.stream, reason, self.context.settings.kick_timeout).await;
        self.stream.shutdown().await.ok();
    }

    /// Relay until either side closes, then close the other.
    async fn relay(&mut self, backend: BackendTunnel) {
        let target = backend.target().clone();
        let kick_timeout = self.context.settings.kick_timeout;
        let (mut backend_read, mut backend_write) = backend.into_split();
        let (mut client_read, mut client_write) = tokio::io::split(&mut self.stream);

        let end = tokio::select! {
            result = pump(&mut client_read, &mut backend_write) => RelayEnd::ClientClosed(result),
            result = pump(&mut backend_read, &mut client_write) => RelayEnd::BackendClosed(result),
            reason = kick_requested(&mut self.kick_rx) => RelayEnd::Kicked(reason),
        };

        match end {
            RelayEnd::ClientClosed(result) => {
                match result {
                    Ok(bytes) => info!(bytes_to_backend = bytes, "Client closed connection"),
                    Err(e) => debug!(error = %e, "Client connection failed"),
                }
                backend_write.shutdown().await.ok();
                client_write.shutdown().await.ok();
            }
            RelayEnd::BackendClosed(result) => {
                match result {
                    Ok(bytes) => info!(backend = %target, bytes_from_backend = bytes, "Server closed connection"),
                    Err(e) => debug!(backend = %target, error = %e, "Backend connection failed"),
                }
                client_write.shutdown().await.ok();
            }
            RelayEnd::Kicked(reason) => {
                info!(reason = %reason, "Kicking client");
                write_disconnect(&mut client_write, &reason, kick_timeout).await;
                client_write.shutdown().await.ok();
                backend_write.shutdown().await.ok();
                self.state = TunnelState::Kicked;
            }
        }
    }
}

/// Write a disconnect packet, giving up after `limit`.
async fn write_disconnect<W>(writer: &mut W, reason: &str, limit: Duration)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let packet = Packet::disconnect(reason).encode();
    match timeout(limit, writer.write_all(&packet)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to deliver disconnect packet"),
        Err(_) => debug!(limit_ms = limit.as_millis() as u64, "Disconnect packet not delivered in time"),
    }
}

/// Resolves with a kick reason sent through the live set.
///
/// Never resolves once the sender is gone without a reason.
async fn kick_requested(rx: &mut Option<oneshot::Receiver<String>>) -> String {
    let Some(inner) = rx.as_mut() else {
        return std::future::pending().await;
    };
    let result = inner.await;
    *rx = None;
    match result {
        Ok(reason) => reason,
        Err(_) => std::future::pending().await,
    }
}
