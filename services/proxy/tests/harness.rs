//! Test harness for proxy integration tests.
//!
//! Provides helpers to spawn backends and a proxy listener on loopback and to
//! speak the client side of the legacy protocol.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use mvhp_proxy::{
    HostEntry, HostTable, Listener, ListenerConfig, Packet, Router, ServerStatus, TunnelSettings,
};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend that echoes everything and records what it received.
#[allow(dead_code)]
pub struct TcpEchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub received: Arc<Mutex<Vec<u8>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TcpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let received_clone = Arc::clone(&received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let received = Arc::clone(&received_clone);
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 8192];
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) => break,
                                            Ok(n) => {
                                                received.lock().unwrap().extend_from_slice(&buf[..n]);
                                                if stream.write_all(&buf[..n]).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(_) => break,
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for TcpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Backend that waits for the replayed handshake, sends a farewell and
/// closes the connection.
#[allow(dead_code)]
pub struct ClosingBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
}

impl ClosingBackend {
    pub async fn spawn(farewell: &'static [u8]) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let conn_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                conn_clone.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1024];
                    if matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {
                        let _ = stream.write_all(farewell).await;
                    }
                    let _ = stream.shutdown().await;
                });
            }
        });

        Ok(Self { addr, connections })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Backend that hands every accepted socket to the test.
#[allow(dead_code)]
pub struct HoldingBackend {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<TcpStream>,
}

#[allow(dead_code)]
impl HoldingBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if tx.send(stream).is_err() {
                    break;
                }
            }
        });

        Ok(Self { addr, accepted })
    }

    /// Next connection the proxy opened.
    pub async fn next_connection(&mut self) -> TcpStream {
        tokio::time::timeout(TEST_TIMEOUT, self.accepted.recv())
            .await
            .expect("proxy never connected to the backend")
            .expect("backend listener stopped")
    }
}

pub struct ProxyHandle {
    pub listen_addr: SocketAddr,
    pub listener: Arc<Listener>,
    pub router: Arc<Router>,
}

impl ProxyHandle {
    pub async fn spawn(entries: Vec<HostEntry>, status: ServerStatus) -> io::Result<Self> {
        Self::spawn_with(entries, status, TunnelSettings::default()).await
    }

    pub async fn spawn_with(
        entries: Vec<HostEntry>,
        status: ServerStatus,
        tunnel: TunnelSettings,
    ) -> io::Result<Self> {
        let router = Arc::new(Router::new(HostTable::from_entries(entries)));
        let status = Arc::new(ArcSwap::from_pointee(status));

        let mut config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
        config.tunnel = tunnel;

        let listener = Arc::new(Listener::bind(config, Arc::clone(&router), status).await?);
        let listen_addr = listener.local_addr()?;

        tokio::spawn({
            let listener = Arc::clone(&listener);
            async move {
                let _ = listener.run().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            listen_addr,
            listener,
            router,
        })
    }

    pub async fn connect(&self) -> io::Result<TcpStream> {
        TcpStream::connect(self.listen_addr).await
    }

    /// Wait until the live set holds exactly `expected` clients.
    pub async fn wait_for_live(&self, expected: usize) {
        let waited = tokio::time::timeout(TEST_TIMEOUT, async {
            while self.listener.live_count() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "live count stuck at {} (expected {})",
            self.listener.live_count(),
            expected
        );
    }
}

/// Host entry pointing at a loopback backend.
pub fn make_entry(name: &str, backend: SocketAddr) -> HostEntry {
    HostEntry::new(name)
        .with_address(backend.ip().to_string())
        .with_port(backend.port())
}

/// Handshake packet bytes for `player` connecting to `host`.
pub fn handshake(player: &str, host: &str) -> Vec<u8> {
    Packet::handshake(format!("{player};{host}:25565")).encode()
}

/// Disconnect packet bytes for `reason`.
pub fn disconnect(reason: &str) -> Vec<u8> {
    Packet::disconnect(reason).encode()
}

/// Read until the proxy closes the connection.
pub async fn read_until_close(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut received = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "proxy did not close"))??;
    Ok(received)
}

/// Port that nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
