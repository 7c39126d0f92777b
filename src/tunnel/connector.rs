//! WebSocket connectors
//!
//! A [`Connector`] performs the client handshake for an already signed
//! request. The default [`WebSocketConnector`] speaks `wss://` over rustls.

use super::WsStream;
use crate::error::{Result, TunnelError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::crypto::ring::default_provider;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::Connector as TlsConnector;
use tracing::{debug, warn};

/// Performs the WebSocket client handshake
#[async_trait]
pub trait Connector: Debug + Send + Sync + 'static {
    /// Connect using the given handshake request
    async fn connect(&self, request: Request) -> Result<WsStream>;
}

/// `wss://` connector backed by rustls
#[derive(Clone)]
pub struct WebSocketConnector {
    tls: Arc<ClientConfig>,
}

impl Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector").finish_non_exhaustive()
    }
}

impl WebSocketConnector {
    /// Build a connector trusting the system roots plus an optional PEM file
    pub fn new(trusted_root: Option<&Path>) -> Result<Self> {
        let mut root_store = RootCertStore::empty();

        let native_certs = rustls_native_certs::load_native_certs();
        for err in &native_certs.errors {
            debug!("Skipping native certificate: {}", err);
        }
        for cert in native_certs.certs {
            root_store.add(cert).ok();
        }

        if let Some(root_path) = trusted_root {
            let file = std::fs::File::open(root_path).map_err(|e| {
                TunnelError::InvalidOptions(format!(
                    "cannot open certificate file {}: {}",
                    root_path.display(),
                    e
                ))
            })?;
            let mut reader = BufReader::new(file);
            let certs = rustls_pemfile::certs(&mut reader)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    TunnelError::InvalidOptions(format!(
                        "cannot parse certificates from {}: {}",
                        root_path.display(),
                        e
                    ))
                })?;
            for cert in certs {
                root_store.add(cert).map_err(|e| {
                    TunnelError::InvalidOptions(format!("cannot add certificate: {}", e))
                })?;
            }
        }

        if root_store.is_empty() {
            warn!("No trusted root certificates loaded, TLS handshakes will fail");
        }

        let tls = ClientConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| TunnelError::InvalidOptions(format!("TLS configuration: {}", e)))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(WebSocketConnector { tls: Arc::new(tls) })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: Request) -> Result<WsStream> {
        let (ws, response) = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            true,
            Some(TlsConnector::Rustls(self.tls.clone())),
        )
        .await
        .map_err(handshake_error)?;

        debug!("WebSocket handshake completed: {}", response.status());
        Ok(ws)
    }
}

/// Map a tungstenite handshake error to [`TunnelError::HandshakeFailure`]
pub fn handshake_error(err: WsError) -> TunnelError {
    match err {
        WsError::Http(response) => TunnelError::HandshakeFailure(format!(
            "router responded with HTTP {}",
            response.status()
        )),
        other => TunnelError::HandshakeFailure(other.to_string()),
    }
}
