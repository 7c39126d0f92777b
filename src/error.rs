//! Error types for Socklink
//!
//! This module defines the error taxonomy shared by the tunnel engine.

use crate::port::Protocol;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Main error type for Socklink operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Credentials file exists but could not be parsed
    #[error("credentials file error: {0}")]
    ConfigParse(String),

    /// Requested profile is not present in the credentials file
    #[error("credential profile not found: {0}")]
    ProfileNotFound(String),

    /// Profile section lacks one of the required fields
    #[error("credentials missing: {0}")]
    MissingCredentialField(&'static str),

    /// Target specifier is empty or malformed
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Proxy options rejected by the builder
    #[error("invalid proxy options: {0}")]
    InvalidOptions(String),

    /// Every port in the scan range is taken
    #[error("no available {0} port found")]
    NoPortAvailable(Protocol),

    /// Request signing failed
    #[error("signing error: {0}")]
    Signing(String),

    /// WebSocket handshake did not complete in time
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// WebSocket handshake was rejected or failed
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// Local listener or socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    LocalBind {
        /// Address that was being bound
        addr: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The proxy has already been opened
    #[error("proxy already open on {0}")]
    AlreadyOpen(SocketAddr),

    /// The session was closed before its handshake finished
    #[error("session closed")]
    SessionClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TunnelError {
    /// Whether this error aborts `Proxy::open` rather than a single session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TunnelError::ConfigParse(_)
                | TunnelError::ProfileNotFound(_)
                | TunnelError::MissingCredentialField(_)
                | TunnelError::InvalidTarget(_)
                | TunnelError::InvalidOptions(_)
                | TunnelError::NoPortAvailable(_)
                | TunnelError::LocalBind { .. }
                | TunnelError::AlreadyOpen(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_error_display() {
        let err = TunnelError::ConfigParse("line 3: bad".to_string());
        assert_eq!(format!("{}", err), "credentials file error: line 3: bad");

        let err = TunnelError::ProfileNotFound("work".to_string());
        assert_eq!(format!("{}", err), "credential profile not found: work");

        let err = TunnelError::MissingCredentialField("R3_ACCESS_KEY_ID");
        assert_eq!(format!("{}", err), "credentials missing: R3_ACCESS_KEY_ID");

        let err = TunnelError::InvalidTarget("empty".to_string());
        assert_eq!(format!("{}", err), "invalid target: empty");

        let err = TunnelError::NoPortAvailable(Protocol::Udp);
        assert_eq!(format!("{}", err), "no available UDP port found");

        let err = TunnelError::HandshakeTimeout(Duration::from_secs(20));
        assert_eq!(format!("{}", err), "handshake timed out after 20s");

        let err = TunnelError::SessionClosed;
        assert_eq!(format!("{}", err), "session closed");
    }

    #[test]
    fn test_local_bind_display() {
        let err = TunnelError::LocalBind {
            addr: "127.0.0.1:30000".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(
            format!("{}", err),
            "failed to bind 127.0.0.1:30000: address in use"
        );
    }

    #[test]
    fn test_tunnel_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: TunnelError = io_err.into();
        assert!(matches!(err, TunnelError::Io(_)));
    }

    #[test]
    fn test_is_fatal() {
        assert!(TunnelError::NoPortAvailable(Protocol::Tcp).is_fatal());
        assert!(TunnelError::MissingCredentialField("R3_SECRET_ACCESS_KEY").is_fatal());
        assert!(TunnelError::ConfigParse("x".into()).is_fatal());
        assert!(!TunnelError::HandshakeFailure("403".into()).is_fatal());
        assert!(!TunnelError::HandshakeTimeout(Duration::from_secs(1)).is_fatal());
        assert!(!TunnelError::SessionClosed.is_fatal());
    }
}
