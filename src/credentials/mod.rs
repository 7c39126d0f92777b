//! Credential resolution
//!
//! Credentials are looked up through an explicit, ordered chain of
//! [`CredentialSource`]s. The first source that yields a key pair wins, and
//! the result is cached for the lifetime of the [`CredentialResolver`].

pub mod ini;

use crate::error::{Result, TunnelError};
use crate::helper::{ACCESS_KEY_ID, DEFAULT_PROFILE, SECRET_ACCESS_KEY};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use self::ini::{IniDocument, Section};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Access key pair used to sign handshake requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key_id: String,
    secret: Vec<u8>,
}

impl Credentials {
    /// Create credentials from a raw secret
    pub fn new(key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Credentials {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }

    /// Create credentials from a base64-encoded secret
    pub fn from_base64(key_id: impl Into<String>, secret: &str) -> Result<Self> {
        let secret = BASE64
            .decode(secret.trim())
            .map_err(|e| TunnelError::Signing(format!("secret is not valid base64: {}", e)))?;
        Ok(Credentials::new(key_id, secret))
    }

    /// Key identifier sent alongside the signature
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// HMAC key
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One link in the credential provider chain
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Key pair supplied directly (environment or caller)
    Static {
        /// Access key id
        key_id: String,
        /// Base64-encoded secret
        secret: String,
    },
    /// Profile inside an INI credentials file
    File {
        /// Path to the credentials file
        path: PathBuf,
        /// Profile (section) name, matched case-insensitively
        profile: String,
    },
}

impl CredentialSource {
    /// Read `R3_ACCESS_KEY_ID` / `R3_SECRET_ACCESS_KEY` from the process
    /// environment. Returns `None` unless both are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let key_id = std::env::var(ACCESS_KEY_ID).ok().filter(|v| !v.is_empty())?;
        let secret = std::env::var(SECRET_ACCESS_KEY).ok().filter(|v| !v.is_empty())?;
        Some(CredentialSource::Static { key_id, secret })
    }

    /// File source for the given profile
    pub fn file(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        CredentialSource::File {
            path: path.into(),
            profile: profile.into(),
        }
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        match self {
            CredentialSource::Static { key_id, secret } => {
                Credentials::from_base64(key_id.clone(), secret).map(Some)
            }
            CredentialSource::File { path, profile } => load_file(path, profile).await,
        }
    }
}

/// Resolves credentials once and caches the outcome
#[derive(Debug, Default)]
pub struct CredentialResolver {
    sources: Vec<CredentialSource>,
    cached: OnceCell<Option<Arc<Credentials>>>,
}

impl CredentialResolver {
    /// Create a resolver over an ordered list of sources
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        CredentialResolver {
            sources,
            cached: OnceCell::new(),
        }
    }

    /// Resolver that never yields credentials
    pub fn anonymous() -> Self {
        CredentialResolver::new(Vec::new())
    }

    /// Resolve credentials, walking the chain on first call only.
    ///
    /// `Ok(None)` means no source produced a key pair and the tunnel runs
    /// unauthenticated.
    pub async fn resolve(&self) -> Result<Option<Arc<Credentials>>> {
        self.cached
            .get_or_try_init(|| async {
                for source in &self.sources {
                    if let Some(credentials) = source.load().await? {
                        debug!("Using credentials with key id {}", credentials.key_id());
                        return Ok(Some(Arc::new(credentials)));
                    }
                }
                Ok::<_, TunnelError>(None)
            })
            .await
            .cloned()
    }
}

async fn load_file(path: &Path, profile: &str) -> Result<Option<Credentials>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} not found, unauthenticated access", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let doc = IniDocument::parse(&content).map_err(|e| TunnelError::ConfigParse(e.to_string()))?;
    let section = select_profile(&doc, profile)?;
    credentials_from_section(section).map(Some)
}

/// Pick the profile section, falling back to the unsectioned keys for the
/// default profile.
fn select_profile<'a>(doc: &'a IniDocument, profile: &str) -> Result<&'a Section> {
    if let Some(section) = doc.section(profile) {
        return Ok(section);
    }
    if profile.is_empty() || profile.eq_ignore_ascii_case(DEFAULT_PROFILE) {
        return Ok(doc.global());
    }
    Err(TunnelError::ProfileNotFound(profile.to_string()))
}

fn credentials_from_section(section: &Section) -> Result<Credentials> {
    let field = |name: &'static str| {
        section
            .get(name)
            .filter(|v| !v.is_empty())
            .ok_or(TunnelError::MissingCredentialField(name))
    };
    let key_id = field(ACCESS_KEY_ID)?;
    let secret = field(SECRET_ACCESS_KEY)?;
    Credentials::from_base64(key_id.clone(), secret)
}
