//! mvhp
//!
//! Virtual-host proxy for legacy Minecraft servers.
//!
//! This service:
//! - Accepts client connections on one port
//! - Answers server list pings with the configured MOTD and capacity
//! - Routes each handshake to a backend by the address the client typed
//! - Relays the connection until either side closes
//!
//! Signals:
//! - SIGHUP reloads the host file
//! - SIGUSR1 logs live connection and host counts
//! - SIGINT / SIGTERM kick every client and exit

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mvhp_proxy::proxy::SHUTDOWN_REASON;
use mvhp_proxy::{HostsFile, Listener, ListenerConfig, Router, TunnelSettings};

mod config;

/// Time given to kicked clients to receive their disconnect packet.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to MVHP_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting mvhp");
    info!(
        bind_addr = %config.bind_addr,
        hosts_file = %config.hosts_file.display(),
        max_connections = config.max_connections,
        handshake_timeout_ms = config.handshake_timeout.map(|d| d.as_millis() as u64),
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let hosts = HostsFile::new(&config.hosts_file);
    let settings = hosts.load()?;

    let router = Arc::new(Router::new(settings.table));
    let status = Arc::new(ArcSwap::from_pointee(settings.status));

    let mut listener_config = ListenerConfig::new(config.bind_addr);
    listener_config.max_connections = config.max_connections;
    listener_config.tunnel = TunnelSettings {
        handshake_timeout: config.handshake_timeout,
        connect_timeout: config.connect_timeout,
        ..TunnelSettings::default()
    };

    let listener = Listener::bind(listener_config, Arc::clone(&router), Arc::clone(&status))
        .await
        .with_context(|| format!("Failed to bind listener on {}", config.bind_addr))?;
    let listener = Arc::new(listener);

    let accept_loop = tokio::spawn({
        let listener = Arc::clone(&listener);
        async move {
            if let Err(e) = listener.run().await {
                error!(error = %e, "Listener error");
            }
        }
    });

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!(path = %hosts.path().display(), "Reloading host file");
                if let Err(e) = hosts.reload(&router, &status) {
                    error!(error = %format!("{e:#}"), "Host file reload failed, keeping previous configuration");
                }
            }
            _ = sigusr1.recv() => {
                info!(
                    live_connections = listener.live_count(),
                    host_count = router.host_count(),
                    "Status"
                );
            }
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
        }
    }

    info!("Shutting down");
    listener.terminate(SHUTDOWN_REASON);
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    accept_loop.await.ok();

    info!("Shutdown complete");
    Ok(())
}
