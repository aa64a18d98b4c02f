pub mod error;
pub mod hosts;
pub mod proxy;

pub use error::TunnelError;
pub use hosts::{HostsFile, ProxySettings};
pub use proxy::{
    BackendTarget, BackendTunnel, ClientTunnel, ConnectionId, HostEntry, HostTable, Listener,
    ListenerConfig, LiveSet, Packet, Router, ServerStatus, SharedRouter, SharedStatus,
    TunnelSettings, TunnelState,
};
