//! Backend side of a proxied connection.
//!
//! A backend tunnel is created once a handshake has been routed:
//! - Connects to the resolved backend, bounded by a connect timeout
//! - Replays the client's handshake so the backend sees the original string
//! - Forwards backend bytes to the client verbatim until either side closes
//!
//! Connect failures are classified into "unreachable" and "unexpected"; the
//! client leg turns them into a kick. There is no retry.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::codec::Packet;
use super::router::BackendTarget;
use crate::error::TunnelError;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay buffer size per direction.
pub const RELAY_BUFFER_SIZE: usize = 8192;

/// Connected backend leg.
pub struct BackendTunnel {
    target: BackendTarget,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl BackendTunnel {
    /// Connect to `target` and replay `handshake` to it.
    pub async fn connect(
        target: BackendTarget,
        handshake: &str,
        connect_timeout: Duration,
    ) -> Result<Self, TunnelError> {
        debug!(backend = %target, "Connecting to backend");

        let connect = TcpStream::connect((target.host.as_str(), target.port));
        let stream = match timeout(connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TunnelError::from_connect(target.to_string(), e)),
            Err(_) => {
                return Err(TunnelError::from_connect(
                    target.to_string(),
                    io::Error::new(io::ErrorKind::TimedOut, "connect timeout"),
                ))
            }
        };
        stream.set_nodelay(true).ok();

        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(&Packet::handshake(handshake).encode())
            .await
            .map_err(|e| TunnelError::BackendError {
                target: target.to_string(),
                source: e,
            })?;

        debug!(backend = %target, "Handshake replayed to backend");

        Ok(Self {
            target,
            reader,
            writer,
        })
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Write client bytes to the backend.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.writer.write_all(data).await
    }

    /// Split into the halves used by the relay.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

/// Copy `reader` into `writer` until EOF or error.
///
/// Chunks are written whole and in order. Returns the number of bytes
/// forwarded; EOF is a normal close, not an error.
pub async fn pump<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}
