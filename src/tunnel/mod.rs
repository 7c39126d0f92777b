//! Tunnel module for Socklink
//!
//! This module provides the per-connection tunnel machinery: connecting to
//! the router, the session lifecycle, keepalive and the local endpoints that
//! sessions pump data to and from.

mod connector;
mod dialer;
mod endpoint;
pub mod keepalive;
mod session;

pub use connector::{handshake_error, Connector, WebSocketConnector};
pub use dialer::Dialer;
pub use endpoint::{
    DatagramEndpoint, DatagramReader, DatagramWriter, LocalEndpoint, LocalReader, LocalWriter,
    StreamEndpoint, StreamReader, StreamWriter,
};
pub use session::{SessionPump, SessionState, TunnelSession};

use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// WebSocket connection to the router
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
