//! Proxy configuration.
//!
//! Process-level settings come from the environment; the routable hosts live
//! in a separate JSON file (see `hosts.rs`) so they can be reloaded.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use mvhp_proxy::proxy::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT,
};

/// Proxy configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to accept clients on.
    pub bind_addr: SocketAddr,

    /// Host table file.
    pub hosts_file: PathBuf,

    /// Maximum concurrent client connections.
    pub max_connections: usize,

    /// Time a client gets to send its opening packet. `None` disables the limit.
    pub handshake_timeout: Option<Duration>,

    /// Backend connect timeout.
    pub connect_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let bind_addr: SocketAddr = std::env::var("MVHP_BIND_ADDR")
            .unwrap_or_else(|_| format!("0.0.0.0:{DEFAULT_PORT}"))
            .parse()
            .context("MVHP_BIND_ADDR must be a socket address (example: 0.0.0.0:25565).")?;

        let hosts_file = std::env::var("MVHP_HOSTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("hosts.json"));

        let max_connections: usize = std::env::var("MVHP_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MVHP_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let handshake_timeout_ms: u64 = std::env::var("MVHP_HANDSHAKE_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MVHP_HANDSHAKE_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64);
        let handshake_timeout =
            (handshake_timeout_ms > 0).then(|| Duration::from_millis(handshake_timeout_ms));

        let connect_timeout_ms: u64 = std::env::var("MVHP_CONNECT_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MVHP_CONNECT_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64);
        let connect_timeout = Duration::from_millis(connect_timeout_ms.max(50));

        let log_level = std::env::var("MVHP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            bind_addr,
            hosts_file,
            max_connections,
            handshake_timeout,
            connect_timeout,
            log_level,
        })
    }
}
