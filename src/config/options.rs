//! Proxy options
//!
//! Immutable configuration captured when a proxy is constructed, built and
//! validated through [`ProxyOptionsBuilder`].

use crate::error::{Result, TunnelError};
use crate::helper::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS, DEFAULT_ROUTER, LOCALHOST,
    MAX_SCAN_PORT, MIN_SCAN_PORT,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

/// Headers the WebSocket handshake owns; callers may not override them.
const RESERVED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Inclusive range of local ports to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    /// Lowest port tried
    pub min: u16,
    /// Highest port tried
    pub max: u16,
}

impl PortRange {
    /// Create a new range
    pub fn new(min: u16, max: u16) -> Self {
        PortRange { min, max }
    }

    /// Number of ports covered by the range
    pub fn len(&self) -> usize {
        if self.min > self.max {
            0
        } else {
            (self.max - self.min) as usize + 1
        }
    }

    /// Whether the range covers no ports
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `port` falls inside the range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange::new(MIN_SCAN_PORT, MAX_SCAN_PORT)
    }
}

/// Immutable proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    bind: String,
    port: Option<u16>,
    udp: bool,
    scan_range: PortRange,
    ping_interval: Duration,
    connect_timeout: Duration,
    headers: Vec<(HeaderName, HeaderValue)>,
    router: String,
    trusted_root: Option<PathBuf>,
}

impl ProxyOptions {
    /// Start building a set of options from the defaults
    pub fn builder() -> ProxyOptionsBuilder {
        ProxyOptionsBuilder::default()
    }

    /// Local address to bind
    pub fn bind(&self) -> &str {
        &self.bind
    }

    /// Explicit local port, `None` to scan
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Whether the proxy listens for UDP instead of TCP
    pub fn is_udp(&self) -> bool {
        self.udp
    }

    /// Range scanned when no explicit port is given
    pub fn scan_range(&self) -> PortRange {
        self.scan_range
    }

    /// Keepalive ping interval
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Bound on the WebSocket handshake
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Extra headers sent on every handshake
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Whether the caller already supplies an `authorization` header
    pub fn has_authorization(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name == tokio_tungstenite::tungstenite::http::header::AUTHORIZATION)
    }

    /// Router hostname used for service codes
    pub fn router(&self) -> &str {
        &self.router
    }

    /// Extra PEM trust root for the router's TLS certificate
    pub fn trusted_root(&self) -> Option<&Path> {
        self.trusted_root.as_deref()
    }
}

impl Default for ProxyOptions {
    fn default() -> Self {
        ProxyOptions {
            bind: LOCALHOST.to_string(),
            port: None,
            udp: false,
            scan_range: PortRange::default(),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            headers: Vec::new(),
            router: DEFAULT_ROUTER.to_string(),
            trusted_root: None,
        }
    }
}

/// Builder for [`ProxyOptions`]
#[derive(Debug, Clone)]
pub struct ProxyOptionsBuilder {
    bind: String,
    port: Option<u16>,
    udp: bool,
    scan_range: PortRange,
    ping_interval: Duration,
    connect_timeout: Duration,
    headers: Vec<(String, String)>,
    router: String,
    trusted_root: Option<PathBuf>,
}

impl Default for ProxyOptionsBuilder {
    fn default() -> Self {
        let defaults = ProxyOptions::default();
        ProxyOptionsBuilder {
            bind: defaults.bind,
            port: None,
            udp: false,
            scan_range: defaults.scan_range,
            ping_interval: defaults.ping_interval,
            connect_timeout: defaults.connect_timeout,
            headers: Vec::new(),
            router: defaults.router,
            trusted_root: None,
        }
    }
}

impl ProxyOptionsBuilder {
    /// Set the local bind address
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Use an explicit local port instead of scanning
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Proxy UDP datagrams instead of TCP connections
    pub fn udp(mut self, udp: bool) -> Self {
        self.udp = udp;
        self
    }

    /// Set the scan range
    pub fn scan_range(mut self, min: u16, max: u16) -> Self {
        self.scan_range = PortRange::new(min, max);
        self
    }

    /// Set the keepalive ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add a header sent on every handshake
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the router hostname
    pub fn router(mut self, router: impl Into<String>) -> Self {
        self.router = router.into();
        self
    }

    /// Trust an extra PEM certificate when connecting to the router
    pub fn trusted_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.trusted_root = Some(path.into());
        self
    }

    /// Validate and freeze the options
    pub fn build(self) -> Result<ProxyOptions> {
        if self.bind.trim().is_empty() {
            return Err(invalid("bind address must not be empty"));
        }
        if self.router.trim().is_empty() {
            return Err(invalid("router hostname must not be empty"));
        }
        if self.port == Some(0) {
            return Err(invalid("explicit port must not be 0"));
        }
        if self.scan_range.min == 0 {
            return Err(invalid("scan range must not include port 0"));
        }
        if self.scan_range.min > self.scan_range.max {
            return Err(invalid(format!(
                "scan range is empty: {} > {}",
                self.scan_range.min, self.scan_range.max
            )));
        }
        if self.ping_interval.is_zero() {
            return Err(invalid("ping interval must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect timeout must be positive"));
        }

        let mut headers = Vec::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| invalid(format!("invalid header name: {:?}", name)))?;
            if RESERVED_HEADERS.contains(&name.as_str()) {
                return Err(invalid(format!("header {} is reserved", name)));
            }
            let value = HeaderValue::from_str(&value)
                .map_err(|_| invalid(format!("invalid value for header {}", name)))?;
            headers.push((name, value));
        }

        Ok(ProxyOptions {
            bind: self.bind,
            port: self.port,
            udp: self.udp,
            scan_range: self.scan_range,
            ping_interval: self.ping_interval,
            connect_timeout: self.connect_timeout,
            headers,
            router: self.router,
            trusted_root: self.trusted_root,
        })
    }
}

fn invalid(msg: impl Into<String>) -> TunnelError {
    TunnelError::InvalidOptions(msg.into())
}
