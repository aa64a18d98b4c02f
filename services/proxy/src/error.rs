//! Error types for proxied connections.

use std::io;

use thiserror::Error;

/// Kick reason for a packet the proxy does not accept before binding.
pub const REASON_UNEXPECTED_PACKET: &str = "Unexpected packet";

/// Kick reason for a handshake that names no configured host.
pub const REASON_NO_SERVER: &str = "No minecraft server exists at this address";

/// Kick reason for a backend that refused or could not be reached.
pub const REASON_UNREACHABLE: &str = "Server unreachable";

/// Kick reason for any other backend socket failure.
pub const REASON_UNEXPECTED_ERROR: &str = "Unexpected error";

/// Kick reason for a client that never finished its handshake.
pub const REASON_HANDSHAKE_TIMEOUT: &str = "Took too long to log in";

/// Failures of a single proxied connection. None of them outlive it.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// First packet was neither a status query nor a handshake.
    #[error("protocol_violation: unexpected packet 0x{0:02x}")]
    ProtocolViolation(u8),

    /// Handshake is malformed or names an unknown host.
    #[error("routing_failure: {0}")]
    RoutingFailure(String),

    /// Backend refused the connection or could not be reached.
    #[error("backend_unreachable: {target}: {source}")]
    BackendUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Any other backend connect failure.
    #[error("backend_error: {target}: {source}")]
    BackendError {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Client did not complete its handshake in time.
    #[error("handshake_timeout")]
    HandshakeTimeout,

    /// Client socket failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl TunnelError {
    /// Classify a failed backend connect.
    pub fn from_connect(target: impl Into<String>, source: io::Error) -> Self {
        let target = target.into();
        match source.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::TimedOut => Self::BackendUnreachable { target, source },
            _ => Self::BackendError { target, source },
        }
    }

    /// Reason sent to the client in a disconnect packet, if this error
    /// warrants a kick rather than a silent close.
    pub fn kick_reason(&self) -> Option<&'static str> {
        match self {
            TunnelError::ProtocolViolation(_) => Some(REASON_UNEXPECTED_PACKET),
            TunnelError::RoutingFailure(_) => Some(REASON_NO_SERVER),
            TunnelError::BackendUnreachable { .. } => Some(REASON_UNREACHABLE),
            TunnelError::BackendError { .. } => Some(REASON_UNEXPECTED_ERROR),
            TunnelError::HandshakeTimeout => Some(REASON_HANDSHAKE_TIMEOUT),
            TunnelError::Io(_) => None,
        }
    }

    /// Standardized reason code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TunnelError::ProtocolViolation(_) => "protocol_violation",
            TunnelError::RoutingFailure(_) => "routing_failure",
            TunnelError::BackendUnreachable { .. } => "backend_unreachable",
            TunnelError::BackendError { .. } => "backend_error",
            TunnelError::HandshakeTimeout => "handshake_timeout",
            TunnelError::Io(_) => "io_error",
        }
    }
}
