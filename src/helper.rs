//! Helper utilities for Socklink
//!
//! Shared constants and small functions used throughout the application.

use std::path::PathBuf;
use std::time::Duration;

/// Default router hostname
pub const DEFAULT_ROUTER: &str = "connect.remote.it";

/// Router used with `--debug` when none is configured
pub const DEBUG_ROUTER: &str = "dev-connect.remote.it";

/// Default local bind address
pub const LOCALHOST: &str = "127.0.0.1";

/// User agent sent on every handshake
pub const USER_AGENT: &str = "remoteit-socket-link/1.0";

/// Lowest port tried when scanning for a free local port
pub const MIN_SCAN_PORT: u16 = 30000;

/// Highest port tried when scanning for a free local port
pub const MAX_SCAN_PORT: u16 = 39999;

/// Default WebSocket connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Default keepalive ping interval in seconds
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 60;

/// Bound on the WebSocket close handshake during teardown
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default buffer size for local socket reads
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Maximum UDP datagram size
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Default credential profile name
pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// Environment variable / file key holding the access key id
pub const ACCESS_KEY_ID: &str = "R3_ACCESS_KEY_ID";

/// Environment variable / file key holding the base64 secret
pub const SECRET_ACCESS_KEY: &str = "R3_SECRET_ACCESS_KEY";

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Default location of the credentials file (`~/.remoteit/credentials`)
pub fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".remoteit")
        .join("credentials")
}
