//! Target resolution
//!
//! Turns a caller-supplied target into the router WebSocket endpoint. A bare
//! service code becomes `wss://{code}.{router}/`; anything that looks like a
//! host or URL is used verbatim with the scheme forced to `wss`.

use crate::error::{Result, TunnelError};
use std::fmt;
use url::Url;

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Router-registered service code, normalized to lowercase alphanumerics
    Service(String),
    /// Explicit host (with optional port and path)
    Host(String),
}

/// Fully resolved remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    target: Target,
    url: Url,
}

impl TargetUrl {
    /// Resolve `target` against `router`.
    ///
    /// Pure and deterministic: identical inputs always give the same URL.
    pub fn parse(target: &str, router: &str) -> Result<Self> {
        let input = target.trim();
        if input.is_empty() {
            return Err(TunnelError::InvalidTarget("target required".to_string()));
        }

        if is_service_code(input) {
            let code: String = input
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|c| c.to_ascii_lowercase())
                .collect();
            if code.is_empty() {
                return Err(TunnelError::InvalidTarget(input.to_string()));
            }
            let url = Url::parse(&format!("wss://{}.{}/", code, router))
                .map_err(|e| TunnelError::InvalidTarget(format!("{}: {}", input, e)))?;
            return Ok(TargetUrl {
                target: Target::Service(code),
                url,
            });
        }

        let rest = match input.find("://") {
            Some(i) => &input[i + 3..],
            None => input,
        };
        let url = Url::parse(&format!("wss://{}", rest))
            .map_err(|e| TunnelError::InvalidTarget(format!("{}: {}", input, e)))?;
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(TunnelError::InvalidTarget(input.to_string())),
        };
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(TargetUrl {
            target: Target::Host(authority),
            url,
        })
    }

    /// The parsed target
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// WebSocket endpoint (`wss://…`)
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host[:port]` of the endpoint
    pub fn authority(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Service codes are alphanumerics separated by `-`, `_` or `:` with no host
/// or scheme separators.
fn is_service_code(input: &str) -> bool {
    input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTER: &str = "connect.example.com";

    #[test]
    fn test_service_code() {
        let target = TargetUrl::parse("AB-12", ROUTER).unwrap();
        assert_eq!(target.url().as_str(), "wss://ab12.connect.example.com/");
        assert_eq!(target.target(), &Target::Service("ab12".to_string()));
        assert_eq!(target.authority(), "ab12.connect.example.com");
    }

    #[test]
    fn test_colon_separated_service_key() {
        let target = TargetUrl::parse("80:00:01:7F:7E:00:AB:CD", ROUTER).unwrap();
        assert_eq!(
            target.url().as_str(),
            "wss://8000017f7e00abcd.connect.example.com/"
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        for code in ["x", "Svc-1", "a_b:c", "  padded  "] {
            let a = TargetUrl::parse(code, ROUTER).unwrap();
            let b = TargetUrl::parse(code, ROUTER).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_explicit_host_with_port() {
        let target = TargetUrl::parse("foo.example.com:1234", ROUTER).unwrap();
        assert_eq!(target.url().as_str(), "wss://foo.example.com:1234/");
        assert_eq!(
            target.target(),
            &Target::Host("foo.example.com:1234".to_string())
        );
    }

    #[test]
    fn test_explicit_url_scheme_forced() {
        let target = TargetUrl::parse("https://foo.example.com", ROUTER).unwrap();
        assert_eq!(target.url().scheme(), "wss");
        assert_eq!(target.url().host_str(), Some("foo.example.com"));
        assert_eq!(target.authority(), "foo.example.com");

        let target = TargetUrl::parse("ws://foo.example.com/tunnel?x=1", ROUTER).unwrap();
        assert_eq!(target.url().as_str(), "wss://foo.example.com/tunnel?x=1");
    }

    #[test]
    fn test_empty_target() {
        assert!(matches!(
            TargetUrl::parse("", ROUTER),
            Err(TunnelError::InvalidTarget(_))
        ));
        assert!(matches!(
            TargetUrl::parse("   ", ROUTER),
            Err(TunnelError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_separator_only_code() {
        assert!(matches!(
            TargetUrl::parse("--::", ROUTER),
            Err(TunnelError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_unparseable_host() {
        assert!(TargetUrl::parse("https://", ROUTER).is_err());
        assert!(TargetUrl::parse("bad host.example.com", ROUTER).is_err());
    }

    #[test]
    fn test_display() {
        let target = TargetUrl::parse("svc", ROUTER).unwrap();
        assert_eq!(target.to_string(), "wss://svc.connect.example.com/");
    }
}
