//! Proxy orchestration
//!
//! A [`Proxy`] owns the local listener (TCP) or socket (UDP) for one target.
//! `open` resolves credentials, picks a port, binds and starts accepting;
//! `close` tears everything down and waits for every session to finish.

use crate::config::ProxyOptions;
use crate::credentials::CredentialResolver;
use crate::error::{Result, TunnelError};
use crate::port::{find_available_port, Protocol};
use crate::target::TargetUrl;
use crate::tunnel::{Connector, Dialer, StreamEndpoint, TunnelSession, WebSocketConnector};
use crate::udp::UdpMultiplexer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Live resources of an open proxy
#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
    multiplexer: Option<Arc<UdpMultiplexer>>,
}

/// Local proxy for a single target
#[derive(Debug)]
pub struct Proxy {
    target: TargetUrl,
    options: ProxyOptions,
    resolver: CredentialResolver,
    connector: Option<Arc<dyn Connector>>,
    running: Mutex<Option<Running>>,
}

impl Proxy {
    /// Create a proxy for `target`.
    ///
    /// The target is resolved against the configured router immediately, so
    /// a malformed target fails here rather than on `open`.
    pub fn new(target: &str, options: ProxyOptions, resolver: CredentialResolver) -> Result<Self> {
        let target = TargetUrl::parse(target, options.router())?;
        Ok(Proxy {
            target,
            options,
            resolver,
            connector: None,
            running: Mutex::new(None),
        })
    }

    /// Use `connector` for router connections instead of the default `wss://`
    /// connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Resolved remote endpoint
    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    /// Options the proxy was built with
    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    fn protocol(&self) -> Protocol {
        if self.options.is_udp() {
            Protocol::Udp
        } else {
            Protocol::Tcp
        }
    }

    /// Bind locally and start proxying. Returns the bound port.
    pub async fn open(&self) -> Result<u16> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(TunnelError::AlreadyOpen(current.local_addr));
        }

        let credentials = if self.options.has_authorization() {
            None
        } else {
            self.resolver.resolve().await?
        };
        if credentials.is_none() && !self.options.has_authorization() {
            debug!("No credentials found, connecting unauthenticated");
        }

        let connector: Arc<dyn Connector> = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(WebSocketConnector::new(self.options.trusted_root())?),
        };
        let dialer = Arc::new(
            Dialer::new(self.target.clone(), connector, self.options.connect_timeout())
                .with_headers(self.options.headers().to_vec())
                .with_credentials(credentials),
        );

        let protocol = self.protocol();
        let bind = self.options.bind();
        let port = match self.options.port() {
            Some(port) => port,
            None => find_available_port(self.options.scan_range(), bind, protocol)
                .await
                .ok_or(TunnelError::NoPortAvailable(protocol))?,
        };
        let bind_error = |source: std::io::Error| TunnelError::LocalBind {
            addr: format!("{}:{}", bind, port),
            source,
        };

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let ping_interval = self.options.ping_interval();

        let (local_addr, multiplexer) = match protocol {
            Protocol::Tcp => {
                let listener = TcpListener::bind((bind, port)).await.map_err(bind_error)?;
                let local_addr = listener.local_addr()?;
                tracker.spawn(accept_loop(
                    listener,
                    dialer,
                    ping_interval,
                    cancel.clone(),
                    tracker.clone(),
                ));
                (local_addr, None)
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind((bind, port)).await.map_err(bind_error)?;
                let local_addr = socket.local_addr()?;
                let multiplexer = Arc::new(UdpMultiplexer::new(
                    Arc::new(socket),
                    dialer,
                    ping_interval,
                    cancel.clone(),
                    tracker.clone(),
                ));
                tracker.spawn(multiplexer.clone().run());
                (local_addr, Some(multiplexer))
            }
        };

        info!("{} proxy listening on {} for {}", protocol, local_addr, self.target);
        *running = Some(Running {
            local_addr,
            cancel,
            tracker,
            multiplexer,
        });

        Ok(local_addr.port())
    }

    /// Bound address while open
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Whether the proxy is currently open
    pub async fn is_open(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Number of live UDP peer sessions; always 0 for TCP
    pub async fn udp_session_count(&self) -> usize {
        let multiplexer = self
            .running
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.multiplexer.clone());
        match multiplexer {
            Some(multiplexer) => multiplexer.session_count().await,
            None => 0,
        }
    }

    /// Stop listening, close every session and wait for them to finish.
    ///
    /// Idempotent; closing a proxy that was never opened is a no-op.
    pub async fn close(&self) {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return;
        };

        debug!("Closing proxy on {}", running.local_addr);
        running.cancel.cancel();
        if let Some(multiplexer) = &running.multiplexer {
            multiplexer.close_all().await;
        }
        running.tracker.close();
        running.tracker.wait().await;

        info!("Proxy on {} closed", running.local_addr);
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().as_ref() {
            running.cancel.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    dialer: Arc<Dialer>,
    ping_interval: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let mut next_id: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_id += 1;
                    let id = next_id;
                    let endpoint = match StreamEndpoint::tcp(stream) {
                        Ok(endpoint) => endpoint,
                        Err(e) => {
                            warn!("Failed to configure connection from {}: {}", peer, e);
                            continue;
                        }
                    };
                    let session = TunnelSession::new(id, &cancel);
                    let dialer = dialer.clone();

                    info!("Accepted connection {} from {}", id, peer);
                    tracker.spawn(async move {
                        match session.open(&dialer, endpoint, ping_interval).await {
                            Ok(pump) => pump.run().await,
                            Err(e) => warn!("Tunnel for connection {} failed: {}", id, e),
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    // back off on errors like EMFILE
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    debug!("Accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSource;

    #[test]
    fn test_new_rejects_empty_target() {
        let options = ProxyOptions::builder().build().unwrap();
        let err = Proxy::new("  ", options, CredentialResolver::anonymous()).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidTarget(_)));
    }

    #[test]
    fn test_new_resolves_against_router() {
        let options = ProxyOptions::builder()
            .router("connect.example.com")
            .build()
            .unwrap();
        let proxy = Proxy::new("Svc-1", options, CredentialResolver::anonymous()).unwrap();
        assert_eq!(proxy.target().url().as_str(), "wss://svc1.connect.example.com/");
    }

    #[tokio::test]
    async fn test_close_before_open_is_noop() {
        let options = ProxyOptions::builder().build().unwrap();
        let proxy = Proxy::new("svc", options, CredentialResolver::anonymous()).unwrap();
        proxy.close().await;
        proxy.close().await;
        assert!(!proxy.is_open().await);
    }

    #[tokio::test]
    async fn test_open_fails_on_missing_credential_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[DEFAULT]\nR3_ACCESS_KEY_ID = abc\n").unwrap();

        let options = ProxyOptions::builder().build().unwrap();
        let resolver = CredentialResolver::new(vec![CredentialSource::file(path, "DEFAULT")]);
        let proxy = Proxy::new("svc", options, resolver).unwrap();

        let err = proxy.open().await.unwrap_err();
        assert!(matches!(err, TunnelError::MissingCredentialField(_)));
        assert!(!proxy.is_open().await);
    }

    #[tokio::test]
    async fn test_authorization_header_skips_credential_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[DEFAULT]\nR3_ACCESS_KEY_ID = abc\n").unwrap();

        let options = ProxyOptions::builder()
            .header("Authorization", "Bearer abc")
            .bind("127.0.0.1")
            .build()
            .unwrap();
        let resolver = CredentialResolver::new(vec![CredentialSource::file(path, "DEFAULT")]);
        let proxy = Proxy::new("svc", options, resolver).unwrap();

        let port = proxy.open().await.unwrap();
        assert!(port > 0);
        proxy.close().await;
    }
}
