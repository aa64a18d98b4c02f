//! Handshake-routing TCP proxy.
//!
//! This module provides:
//! - TCP listener management and live connection bookkeeping
//! - Legacy handshake and server list ping decoding
//! - Name-based routing through an atomically swappable host table
//! - Backend connection with handshake replay
//! - Connection proxying
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Client Tunnel -> Router -> Backend Tunnel -> Backend
//!                            |
//!                  server list ping answered here
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{HostEntry, HostTable, Listener, ListenerConfig, Router};
//!
//! let table = HostTable::from_entries(vec![HostEntry::new("mc.example.net").with_port(25566)]);
//! let router = Arc::new(Router::new(table));
//!
//! let config = ListenerConfig::new("0.0.0.0:25565".parse()?);
//! let listener = Arc::new(Listener::bind_default(config, router).await?);
//! listener.run().await?;
//! ```

mod backend;
mod client;
pub mod codec;
mod listener;
mod live;
mod router;

pub use backend::{pump, BackendTunnel, DEFAULT_CONNECT_TIMEOUT};
pub use client::{
    ClientTunnel, ServerStatus, SharedStatus, TunnelContext, TunnelSettings, TunnelState,
    DEFAULT_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KICK_TIMEOUT, DEFAULT_MOTD,
};
pub use codec::{decode_string, encode_string, CodecError, Packet, Sniffed};
pub use listener::{Listener, ListenerConfig, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, SHUTDOWN_REASON};
pub use live::{ConnectionId, LiveGuard, LiveSet};
pub use router::{
    parse_routing_string, BackendTarget, HostEntry, HostTable, Router, SharedRouter,
    DEFAULT_BACKEND_ADDRESS, DEFAULT_BACKEND_PORT,
};
