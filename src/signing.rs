//! Handshake request signing
//!
//! Implements HTTP message signatures (RFC 9421) with `hmac-sha256` over a
//! fixed set of components: `@method`, `@authority`, `@target-uri` and the
//! `date` header, in that order.

use crate::credentials::Credentials;
use crate::error::{Result, TunnelError};
use crate::helper::USER_AGENT;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::hmac;
use tokio_tungstenite::tungstenite::http::{header, HeaderName, HeaderValue, Request, Uri};

/// Label of the signature in `signature-input` / `signature`
pub const SIGNATURE_NAME: &str = "remoteit";

/// Signature algorithm advertised to the router
pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

/// Covered components, in signing order
pub const SIGNED_COMPONENTS: [&str; 4] = ["@method", "@authority", "@target-uri", "date"];

/// Header carrying the signature parameters
pub const SIGNATURE_INPUT: HeaderName = HeaderName::from_static("signature-input");

/// Header carrying the signature itself
pub const SIGNATURE: HeaderName = HeaderName::from_static("signature");

/// Signs WebSocket handshake requests
#[derive(Debug, Clone)]
pub struct RequestSigner {
    user_agent: HeaderValue,
}

impl Default for RequestSigner {
    fn default() -> Self {
        RequestSigner {
            user_agent: HeaderValue::from_static(USER_AGENT),
        }
    }
}

impl RequestSigner {
    /// Create a signer with the default user agent
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign `request` using the current time
    pub fn sign(&self, request: Request<()>, credentials: Option<&Credentials>) -> Result<Request<()>> {
        self.sign_at(request, credentials, Utc::now())
    }

    /// Sign `request` as of `now`.
    ///
    /// A request that already carries `authorization` is returned untouched.
    /// Without credentials only `date` and `user-agent` are added.
    pub fn sign_at(
        &self,
        mut request: Request<()>,
        credentials: Option<&Credentials>,
        now: DateTime<Utc>,
    ) -> Result<Request<()>> {
        if request.headers().contains_key(header::AUTHORIZATION) {
            return Ok(request);
        }

        let date = HeaderValue::from_str(&http_date(now))
            .map_err(|e| TunnelError::Signing(format!("invalid date header: {}", e)))?;
        let headers = request.headers_mut();
        headers.entry(header::DATE).or_insert(date);
        headers
            .entry(header::USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());

        let credentials = match credentials {
            Some(credentials) => credentials,
            None => return Ok(request),
        };

        let params = signature_params(now.timestamp(), credentials.key_id())?;
        let base = signature_base(&request, &params)?;

        let key = hmac::Key::new(hmac::HMAC_SHA256, credentials.secret());
        let tag = hmac::sign(&key, base.as_bytes());

        let input = HeaderValue::from_str(&format!("{}={}", SIGNATURE_NAME, params))
            .map_err(|e| TunnelError::Signing(format!("invalid signature-input: {}", e)))?;
        let signature = HeaderValue::from_str(&format!(
            "{}=:{}:",
            SIGNATURE_NAME,
            BASE64.encode(tag.as_ref())
        ))
        .map_err(|e| TunnelError::Signing(format!("invalid signature: {}", e)))?;

        let headers = request.headers_mut();
        headers.insert(SIGNATURE_INPUT, input);
        headers.insert(SIGNATURE, signature);

        Ok(request)
    }
}

/// IMF-fixdate as used by the HTTP `date` header
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `@signature-params` value: covered components plus metadata
pub fn signature_params(created: i64, key_id: &str) -> Result<String> {
    if key_id.is_empty() || key_id.contains(|c: char| c == '"' || c == '\\') || !key_id.is_ascii() {
        return Err(TunnelError::Signing(format!("unusable key id: {:?}", key_id)));
    }
    let components = SIGNED_COMPONENTS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(" ");
    Ok(format!(
        "({});created={};keyid=\"{}\";alg=\"{}\"",
        components, created, key_id, SIGNATURE_ALGORITHM
    ))
}

/// Build the signature base string for `request`
pub fn signature_base(request: &Request<()>, params: &str) -> Result<String> {
    let uri = request.uri();
    let authority = uri
        .authority()
        .ok_or_else(|| TunnelError::Signing("request has no authority".to_string()))?;
    let date = request
        .headers()
        .get(header::DATE)
        .ok_or_else(|| TunnelError::Signing("date header missing".to_string()))?
        .to_str()
        .map_err(|e| TunnelError::Signing(format!("date header: {}", e)))?;

    let mut base = String::new();
    for component in SIGNED_COMPONENTS {
        let value = match component {
            "@method" => request.method().as_str().to_string(),
            "@authority" => authority.as_str().to_ascii_lowercase(),
            "@target-uri" => target_uri(uri, authority.as_str()),
            _ => date.trim().to_string(),
        };
        base.push_str(&format!("\"{}\": {}\n", component, value));
    }
    base.push_str(&format!("\"@signature-params\": {}", params));
    Ok(base)
}

/// Target URI in the HTTP form the router sees (`wss` → `https`)
fn target_uri(uri: &Uri, authority: &str) -> String {
    let scheme = match uri.scheme_str() {
        Some("wss") | None => "https",
        Some("ws") => "http",
        Some(other) => other,
    };
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{}://{}{}", scheme, authority, path)
}
