//! Test utilities and mocks for Socklink
//!
//! This module provides common test utilities used across integration tests:
//! a local plain `ws://` router and a connector that dials it regardless of
//! the URL host.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use socklink::config::{ProxyOptions, ProxyOptionsBuilder};
use socklink::tunnel::{handshake_error, Connector, WsStream};
use socklink::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as ServerRequest, Response,
};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

/// Router hostname used by every test
pub const TEST_ROUTER: &str = "connect.example.com";

/// How the mock router behaves after accepting a TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    /// Complete the handshake and echo binary frames
    Echo,
    /// Complete the handshake, then never read again (so never pongs)
    Silent,
    /// Accept TCP but never answer the handshake
    Hang,
    /// Answer the handshake with 403
    Reject,
    /// Send `bye`, then close the WebSocket
    Close,
    /// Send [`FLOOD_BYTES`] while discarding whatever the client uploads
    Flood,
}

/// Bytes a [`RouterMode::Flood`] router sends to each client
pub const FLOOD_BYTES: usize = 16 * 1024 * 1024;

/// Local WebSocket router for tests
pub struct MockRouter {
    /// Address the router listens on
    pub addr: SocketAddr,
    /// Handshake headers of every accepted connection
    pub handshakes: mpsc::UnboundedReceiver<HeaderMap>,
}

impl MockRouter {
    /// Start a router in `mode`
    pub async fn start(mode: RouterMode) -> MockRouter {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, handshakes) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(serve(stream, mode, tx));
            }
        });

        MockRouter { addr, handshakes }
    }

    /// Next recorded handshake
    pub async fn next_handshake(&mut self) -> HeaderMap {
        tokio::time::timeout(Duration::from_secs(5), self.handshakes.recv())
            .await
            .expect("no handshake within 5s")
            .expect("router stopped")
    }
}

async fn serve(stream: TcpStream, mode: RouterMode, tx: mpsc::UnboundedSender<HeaderMap>) {
    if mode == RouterMode::Hang {
        let _held = stream;
        std::future::pending::<()>().await;
        return;
    }

    let callback = move |request: &ServerRequest, response: Response| {
        let _ = tx.send(request.headers().clone());
        if mode == RouterMode::Reject {
            let mut rejection = ErrorResponse::new(None);
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            return Err(rejection);
        }
        Ok(response)
    };

    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    match mode {
        RouterMode::Echo => {
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_binary() && ws.send(msg).await.is_err() {
                    break;
                }
            }
        }
        RouterMode::Silent => {
            let _held = ws;
            std::future::pending::<()>().await;
        }
        RouterMode::Close => {
            let _ = ws.send(Message::Binary(b"bye".to_vec())).await;
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        }
        RouterMode::Flood => {
            let (mut tx, mut rx) = ws.split();
            let drain = async { while let Some(Ok(_)) = rx.next().await {} };
            let flood = async {
                let frame = vec![0x5a_u8; 64 * 1024];
                let mut sent = 0;
                while sent < FLOOD_BYTES {
                    if tx.send(Message::Binary(frame.clone())).await.is_err() {
                        return;
                    }
                    sent += frame.len();
                }
            };
            tokio::join!(drain, flood);
        }
        RouterMode::Hang | RouterMode::Reject => {}
    }
}

/// Connects to a mock router over plain TCP, ignoring the request host
#[derive(Debug)]
pub struct TestConnector {
    addr: SocketAddr,
    delay: Duration,
    connects: AtomicUsize,
}

impl TestConnector {
    /// Connector for the router at `addr`
    pub fn new(addr: SocketAddr) -> Arc<Self> {
        Self::with_delay(addr, Duration::ZERO)
    }

    /// Connector that waits `delay` before connecting
    pub fn with_delay(addr: SocketAddr, delay: Duration) -> Arc<Self> {
        Arc::new(TestConnector {
            addr,
            delay,
            connects: AtomicUsize::new(0),
        })
    }

    /// Number of handshakes attempted
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, request: Request) -> Result<WsStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let stream = TcpStream::connect(self.addr).await?;
        let (ws, _) = tokio_tungstenite::client_async(request, MaybeTlsStream::Plain(stream))
            .await
            .map_err(handshake_error)?;
        Ok(ws)
    }
}

/// Options bound to localhost with the test router; the port is scanned
pub fn base_options() -> ProxyOptionsBuilder {
    ProxyOptions::builder()
        .bind("127.0.0.1")
        .router(TEST_ROUTER)
        .connect_timeout(Duration::from_secs(5))
}

/// TCP options on a port that is free right now
pub fn test_options() -> ProxyOptionsBuilder {
    base_options().port(free_port())
}

/// UDP options on a port that is free right now
pub fn udp_options() -> ProxyOptionsBuilder {
    base_options().udp(true).port(free_udp_port())
}

/// Grab a port that is free right now
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Grab a UDP port that is free right now
pub fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_router_records_handshake() {
        let mut router = MockRouter::start(RouterMode::Echo).await;
        let connector = TestConnector::new(router.addr);

        let request = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
            "ws://svc.connect.example.com/",
        )
        .unwrap();
        let ws = connector.connect(request).await.unwrap();

        let headers = router.next_handshake().await;
        assert_eq!(headers.get("host").unwrap(), "svc.connect.example.com");
        assert_eq!(connector.connects(), 1);
        drop(ws);
    }
}
