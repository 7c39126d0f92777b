//! Router dialing
//!
//! The [`Dialer`] owns everything needed to open one WebSocket to the
//! router: the endpoint, extra headers, credentials and the connect timeout.
//! Each call to [`Dialer::dial`] builds and signs a fresh request.

use super::{Connector, WsStream};
use crate::credentials::Credentials;
use crate::error::{Result, TunnelError};
use crate::signing::RequestSigner;
use crate::target::TargetUrl;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::debug;

/// Opens signed WebSocket connections to the router
#[derive(Debug)]
pub struct Dialer {
    target: TargetUrl,
    headers: Vec<(HeaderName, HeaderValue)>,
    credentials: Option<Arc<Credentials>>,
    signer: RequestSigner,
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl Dialer {
    /// Create a dialer with no extra headers and no credentials
    pub fn new(target: TargetUrl, connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Dialer {
            target,
            headers: Vec::new(),
            credentials: None,
            signer: RequestSigner::new(),
            connector,
            timeout,
        }
    }

    /// Send `headers` on every handshake
    pub fn with_headers(mut self, headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        self.headers = headers;
        self
    }

    /// Sign handshakes with `credentials`
    pub fn with_credentials(mut self, credentials: Option<Arc<Credentials>>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Remote endpoint
    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    /// Handshake timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the signed handshake request
    pub fn request(&self) -> Result<Request> {
        let mut request = self
            .target
            .url()
            .as_str()
            .into_client_request()
            .map_err(|e| TunnelError::InvalidTarget(format!("{}: {}", self.target, e)))?;

        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        self.signer.sign(request, self.credentials.as_deref())
    }

    /// Open a WebSocket, bounded by the connect timeout
    pub async fn dial(&self) -> Result<WsStream> {
        let request = self.request()?;
        debug!("Connecting to {}", self.target);

        match tokio::time::timeout(self.timeout, self.connector.connect(request)).await {
            Ok(result) => result,
            Err(_) => Err(TunnelError::HandshakeTimeout(self.timeout)),
        }
    }
}
