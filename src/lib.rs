//! # Socklink - Local Tunneling Proxy Client
//!
//! Socklink exposes a remote, router-registered service on a local TCP or
//! UDP port. Every local connection (or, for UDP, every distinct peer) gets
//! its own WebSocket to the router, authenticated with an HMAC-SHA256 HTTP
//! message signature.
//!
//! ## Features
//!
//! - **TCP and UDP**: one listener per proxy, one tunnel per connection or peer
//! - **Port Scanning**: picks the first free port in a range when none is given
//! - **Signed Handshakes**: credentials from the environment or an INI profile
//! - **Keepalive**: ping/pong liveness with termination of dead tunnels
//! - **Clean Shutdown**: `close` waits for every session to finish
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socklink::config::ProxyOptions;
//! use socklink::credentials::{CredentialResolver, CredentialSource};
//! use socklink::helper::default_credentials_path;
//! use socklink::proxy::Proxy;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = ProxyOptions::builder().build()?;
//!     let resolver = CredentialResolver::new(vec![
//!         CredentialSource::file(default_credentials_path(), "DEFAULT"),
//!     ]);
//!
//!     let proxy = Proxy::new("ab12cd34", options, resolver)?;
//!     let port = proxy.open().await?;
//!     println!("127.0.0.1:{}", port);
//!
//!     tokio::signal::ctrl_c().await?;
//!     proxy.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Local App -> Socklink (TCP/UDP) -> wss://{service}.{router}/ -> Service
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod helper;
pub mod port;
pub mod proxy;
pub mod signing;
pub mod target;
pub mod tunnel;
pub mod udp;

// Re-export commonly used items
pub use config::{load_config, Config, ProxyOptions};
pub use credentials::{CredentialResolver, CredentialSource, Credentials};
pub use error::{Result, TunnelError};
pub use proxy::Proxy;

/// Version of the Socklink library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
