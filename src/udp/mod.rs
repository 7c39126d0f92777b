//! UDP multiplexing
//!
//! One local UDP socket serves many peers. Each distinct source address gets
//! its own tunnel session; datagrams from that peer are queued to the
//! session in arrival order, including those that arrive while the
//! handshake is still running. Replies from the router go back to the peer
//! through the shared socket.

use crate::helper::MAX_DATAGRAM_SIZE;
use crate::tunnel::{DatagramEndpoint, Dialer, TunnelSession};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Datagrams buffered per peer before new ones are dropped
pub const SESSION_QUEUE_SIZE: usize = 256;

struct PeerEntry {
    session: TunnelSession,
    queue: mpsc::Sender<Bytes>,
}

type SessionTable = Arc<Mutex<HashMap<String, PeerEntry>>>;

/// Key identifying a UDP peer: `address:port`
pub fn session_key(peer: &SocketAddr) -> String {
    format!("{}:{}", peer.ip(), peer.port())
}

/// Routes datagrams from a shared UDP socket to per-peer sessions
pub struct UdpMultiplexer {
    socket: Arc<UdpSocket>,
    sessions: SessionTable,
    dialer: Arc<Dialer>,
    ping_interval: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

impl std::fmt::Debug for UdpMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpMultiplexer")
            .field("socket", &self.socket.local_addr().ok())
            .field("target", &self.dialer.target().to_string())
            .finish_non_exhaustive()
    }
}

impl UdpMultiplexer {
    /// Create a multiplexer over `socket`.
    ///
    /// Sessions are children of `cancel` and are spawned on `tracker`.
    pub fn new(
        socket: Arc<UdpSocket>,
        dialer: Arc<Dialer>,
        ping_interval: Duration,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        UdpMultiplexer {
            socket,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            dialer,
            ping_interval,
            cancel,
            tracker,
            next_id: AtomicU64::new(1),
        }
    }

    /// Local address of the shared socket
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Number of peers with a live session
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Receive datagrams until cancelled, then close every session
    pub async fn run(self: Arc<Self>) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buffer) => match result {
                    Ok((len, peer)) => {
                        self.dispatch(peer, Bytes::copy_from_slice(&buffer[..len])).await;
                    }
                    // e.g. ICMP port unreachable surfacing as ECONNREFUSED
                    Err(e) => warn!("UDP receive error: {}", e),
                },
            }
        }
        self.close_all().await;
        debug!("UDP receive loop stopped");
    }

    /// Route one datagram from `peer`, opening a session on first contact
    pub async fn dispatch(&self, peer: SocketAddr, datagram: Bytes) {
        let key = session_key(&peer);
        let mut sessions = self.sessions.lock().await;

        let mut datagram = datagram;
        if let Some(entry) = sessions.get(&key) {
            if entry.session.is_live() {
                match entry.queue.try_send(datagram) {
                    Ok(()) => return,
                    Err(TrySendError::Full(_)) => {
                        warn!("Queue for {} full, dropping datagram", key);
                        return;
                    }
                    Err(TrySendError::Closed(returned)) => datagram = returned,
                }
            }
            // session is winding down but has not deregistered yet
            debug!("Replacing ending session {} for {}", entry.session.id(), key);
            sessions.remove(&key);
        }

        if self.cancel.is_cancelled() {
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = TunnelSession::new(id, &self.cancel);
        let (queue, rx) = mpsc::channel(SESSION_QUEUE_SIZE);
        if queue.try_send(datagram).is_err() {
            return;
        }
        sessions.insert(
            key.clone(),
            PeerEntry {
                session: session.clone(),
                queue,
            },
        );
        drop(sessions);

        info!("New UDP session {} for {}", id, key);
        let endpoint = DatagramEndpoint::new(self.socket.clone(), peer, rx);
        let dialer = self.dialer.clone();
        let table = self.sessions.clone();
        let ping_interval = self.ping_interval;

        self.tracker.spawn(async move {
            match session.open(&dialer, endpoint, ping_interval).await {
                Ok(pump) => pump.run().await,
                Err(e) => warn!("UDP session {} for {} failed: {}", id, key, e),
            }

            let mut sessions = table.lock().await;
            if sessions.get(&key).map(|entry| entry.session.id()) == Some(id) {
                sessions.remove(&key);
            }
            debug!("UDP session {} for {} removed", id, key);
        });
    }

    /// Close every session and clear the table
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, entry) in sessions.drain() {
            entry.session.close();
        }
    }
}
