//! File configuration types
//!
//! Optional TOML file supplying defaults for the proxy and credential lookup.

use super::options::ProxyOptionsBuilder;
use crate::helper::{default_credentials_path, duration_from_secs, DEFAULT_PROFILE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Credential lookup configuration
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Proxy section; every field is optional and falls back to the built-in default
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProxyConfig {
    /// Router hostname
    pub router: Option<String>,

    /// Local bind address
    pub bind: Option<String>,

    /// Lowest port tried when scanning
    pub scan_min: Option<u16>,

    /// Highest port tried when scanning
    pub scan_max: Option<u16>,

    /// Keepalive ping interval in seconds
    pub ping_interval_secs: Option<u64>,

    /// Handshake timeout in seconds
    pub connect_timeout_secs: Option<u64>,

    /// Extra PEM trust root for the router certificate
    pub trusted_root: Option<PathBuf>,

    /// Extra headers sent on every handshake
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ProxyConfig {
    /// Apply the file values on top of a builder
    pub fn apply(&self, mut builder: ProxyOptionsBuilder) -> ProxyOptionsBuilder {
        if let Some(ref router) = self.router {
            builder = builder.router(router.clone());
        }
        if let Some(ref bind) = self.bind {
            builder = builder.bind(bind.clone());
        }
        if self.scan_min.is_some() || self.scan_max.is_some() {
            let defaults = super::PortRange::default();
            builder = builder.scan_range(
                self.scan_min.unwrap_or(defaults.min),
                self.scan_max.unwrap_or(defaults.max),
            );
        }
        if let Some(secs) = self.ping_interval_secs {
            builder = builder.ping_interval(duration_from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout_secs {
            builder = builder.connect_timeout(duration_from_secs(secs));
        }
        if let Some(ref root) = self.trusted_root {
            builder = builder.trusted_root(root.clone());
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.clone());
        }
        builder
    }
}

/// Default credential profile
fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

/// Credential lookup configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Path to the INI credentials file
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,

    /// Profile (section) name inside the credentials file
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        CredentialsConfig {
            path: default_credentials_path(),
            profile: default_profile(),
        }
    }
}
