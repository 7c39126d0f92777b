//! Tunnel sessions
//!
//! A [`TunnelSession`] pairs one local endpoint with one WebSocket to the
//! router. Its lifecycle is strictly forward:
//!
//! ```text
//! Connecting -> Open -> Closing -> Closed
//!      \____________________________^
//! ```
//!
//! The handle is cheap to clone; [`TunnelSession::open`] performs the
//! handshake and returns a [`SessionPump`] which moves data until either side
//! ends, the keepalive gives up, or the session is closed.

use super::endpoint::{LocalEndpoint, LocalReader, LocalWriter};
use super::keepalive::{ping_timer, Beat, Heartbeat};
use super::{Dialer, WsStream};
use crate::error::{Result, TunnelError};
use crate::helper::CLOSE_TIMEOUT;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in progress
    Connecting,
    /// Data is flowing
    Open,
    /// Tearing down
    Closing,
    /// Finished; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why the pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    LocalEnded,
    LocalError,
    RemoteClosed,
    RemoteError,
    Unresponsive,
}

/// Handle to one tunnel session
#[derive(Debug, Clone)]
pub struct TunnelSession {
    id: u64,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
}

impl TunnelSession {
    /// New session in `Connecting`, closed automatically when `parent` is
    /// cancelled
    pub fn new(id: u64, parent: &CancellationToken) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        TunnelSession {
            id,
            state: Arc::new(state),
            cancel: parent.child_token(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Request teardown. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether teardown has been requested
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the session can still carry data: not asked to close and
    /// not past `Open`
    pub fn is_live(&self) -> bool {
        !self.is_closing() && matches!(self.state(), SessionState::Connecting | SessionState::Open)
    }

    /// Wait until the session reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives as long as self, so this only returns once closed
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    /// Perform the handshake.
    ///
    /// On failure the session goes straight to `Closed` and `local` is
    /// dropped.
    pub async fn open<L: LocalEndpoint>(
        &self,
        dialer: &Dialer,
        local: L,
        ping_interval: Duration,
    ) -> Result<SessionPump<L>> {
        let result = if self.cancel.is_cancelled() {
            Err(TunnelError::SessionClosed)
        } else {
            tokio::select! {
                result = dialer.dial() => result,
                _ = self.cancel.cancelled() => Err(TunnelError::SessionClosed),
            }
        };

        match result {
            Ok(ws) => {
                self.transition(SessionState::Open);
                debug!("Session {} open to {}", self.id, dialer.target());
                Ok(SessionPump {
                    session: self.clone(),
                    ws,
                    local,
                    heartbeat: Heartbeat::new(),
                    ping_interval,
                })
            }
            Err(e) => {
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    fn transition(&self, next: SessionState) {
        let id = self.id;
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == next {
                return false;
            }
            trace!("Session {}: {} -> {}", id, state, next);
            *state = next;
            true
        });
    }
}

/// Data pump for an open session
pub struct SessionPump<L> {
    session: TunnelSession,
    ws: WsStream,
    local: L,
    heartbeat: Heartbeat,
    ping_interval: Duration,
}

impl<L> fmt::Debug for SessionPump<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPump")
            .field("session", &self.session.id)
            .field("ping_interval", &self.ping_interval)
            .finish_non_exhaustive()
    }
}

impl<L: LocalEndpoint> SessionPump<L> {
    /// The session this pump drives
    pub fn session(&self) -> &TunnelSession {
        &self.session
    }

    /// Move data until either side ends. Errors are logged, never returned.
    ///
    /// Each direction runs as its own future, so a local application that
    /// is slow to read never holds up data flowing the other way.
    pub async fn run(self) {
        let SessionPump {
            session,
            ws,
            local,
            heartbeat,
            ping_interval,
        } = self;
        let id = session.id;
        let (mut sink, mut stream) = ws.split();
        let (mut reader, mut writer) = local.split();
        let mut ticker = ping_timer(ping_interval);

        let upload = async {
            loop {
                tokio::select! {
                    _ = ticker.tick() => match heartbeat.tick() {
                        Beat::Ping => {
                            trace!("Session {}: ping", id);
                            if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                                debug!("Session {}: ping failed: {}", id, e);
                                break StopReason::RemoteError;
                            }
                        }
                        Beat::Terminate => {
                            warn!("Session {}: no pong within {:?}, terminating", id, ping_interval);
                            break StopReason::Unresponsive;
                        }
                    },

                    chunk = reader.recv() => match chunk {
                        Ok(Some(data)) => {
                            trace!("Session {}: {} bytes to remote", id, data.len());
                            if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                                debug!("Session {}: send to remote failed: {}", id, e);
                                break StopReason::RemoteError;
                            }
                        }
                        Ok(None) => break StopReason::LocalEnded,
                        Err(e) => {
                            debug!("Session {}: local read failed: {}", id, e);
                            break StopReason::LocalError;
                        }
                    },
                }
            }
        };

        let download = async {
            loop {
                let data = match stream.next().await {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    // tungstenite queues the pong and writes it on the next read
                    Some(Ok(Message::Ping(_))) => continue,
                    Some(Ok(Message::Pong(_))) => {
                        heartbeat.pong();
                        continue;
                    }
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Session {}: remote closed: {:?}", id, frame);
                        break StopReason::RemoteClosed;
                    }
                    Some(Err(e)) => {
                        debug!("Session {}: remote error: {}", id, e);
                        break StopReason::RemoteError;
                    }
                    None => break StopReason::RemoteClosed,
                };

                trace!("Session {}: {} bytes from remote", id, data.len());
                if let Err(e) = writer.send(&data).await {
                    debug!("Session {}: local write failed: {}", id, e);
                    break StopReason::LocalError;
                }
            }
        };

        let reason = tokio::select! {
            _ = session.cancel.cancelled() => StopReason::Cancelled,
            reason = upload => reason,
            reason = download => reason,
        };

        session.transition(SessionState::Closing);
        debug!("Session {} closing: {:?}", id, reason);

        // stop taking local data; for UDP this closes the peer queue
        drop(reader);

        if reason != StopReason::Unresponsive {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => trace!("Session {}: close handshake: {}", id, e),
                Err(_) => trace!("Session {}: close handshake timed out", id),
            }
        }
        drop(sink);
        drop(stream);

        if let Err(e) = writer.shutdown().await {
            trace!("Session {}: local shutdown: {}", id, e);
        }
        drop(writer);

        session.transition(SessionState::Closed);
        debug!("Session {} closed", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetUrl;
    use crate::tunnel::{Connector, StreamEndpoint};
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::handshake::client::Request;
    use tokio_tungstenite::MaybeTlsStream;

    /// Connects over plain TCP to a fixed address, ignoring the URL host
    #[derive(Debug)]
    struct LocalConnector {
        addr: std::net::SocketAddr,
    }

    #[async_trait]
    impl Connector for LocalConnector {
        async fn connect(&self, request: Request) -> Result<WsStream> {
            let stream = TcpStream::connect(self.addr).await?;
            let (ws, _) = tokio_tungstenite::client_async(request, MaybeTlsStream::Plain(stream))
                .await
                .map_err(crate::tunnel::handshake_error)?;
            Ok(ws)
        }
    }

    #[derive(Debug)]
    struct PendingConnector;

    #[async_trait]
    impl Connector for PendingConnector {
        async fn connect(&self, _request: Request) -> Result<WsStream> {
            std::future::pending().await
        }
    }

    async fn echo_router() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_binary() && ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn dialer(connector: Arc<dyn Connector>) -> Dialer {
        let target = TargetUrl::parse("svc", "connect.example.com").unwrap();
        Dialer::new(target, connector, Duration::from_secs(5))
    }

    #[test]
    fn test_new_session_is_connecting() {
        let root = CancellationToken::new();
        let session = TunnelSession::new(7, &root);
        assert_eq!(session.id(), 7);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_closed_is_terminal() {
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        session.transition(SessionState::Closed);
        session.transition(SessionState::Open);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_failure_closes_session() {
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        let (local, _remote) = tokio::io::duplex(64);

        // nothing listens on port 1
        let connector = Arc::new(LocalConnector {
            addr: "127.0.0.1:1".parse().unwrap(),
        });
        let result = session
            .open(&dialer(connector), StreamEndpoint::new(local), Duration::from_secs(60))
            .await;

        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_during_handshake() {
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        let (local, _remote) = tokio::io::duplex(64);
        let dialer = dialer(Arc::new(PendingConnector));

        let handle = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.close();
        });

        let err = session
            .open(&dialer, StreamEndpoint::new(local), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::SessionClosed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_is_live() {
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        assert!(session.is_live());

        session.transition(SessionState::Open);
        assert!(session.is_live());
        session.transition(SessionState::Closing);
        assert!(!session.is_live());

        let other = TunnelSession::new(2, &root);
        other.close();
        assert!(!other.is_live());
    }

    #[tokio::test]
    async fn test_parent_cancel_closes_child() {
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        root.cancel();
        assert!(session.is_closing());
    }

    #[tokio::test]
    async fn test_pump_echo_and_local_eof() {
        let router = echo_router().await;
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        let (local, mut app) = tokio::io::duplex(1024);

        let pump = session
            .open(
                &dialer(Arc::new(LocalConnector { addr: router })),
                StreamEndpoint::new(local),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Open);
        let task = tokio::spawn(pump.run());

        app.write_all(b"ping over tunnel").await.unwrap();
        let mut buf = [0u8; 16];
        app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping over tunnel");

        drop(app);
        task.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_stops_open_pump() {
        let router = echo_router().await;
        let root = CancellationToken::new();
        let session = TunnelSession::new(1, &root);
        let (local, _app) = tokio::io::duplex(1024);

        let pump = session
            .open(
                &dialer(Arc::new(LocalConnector { addr: router })),
                StreamEndpoint::new(local),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        tokio::spawn(pump.run());

        session.close();
        session.close();
        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
