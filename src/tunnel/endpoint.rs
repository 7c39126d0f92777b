//! Local side of a tunnel session
//!
//! A session pumps bytes between a [`LocalEndpoint`] and its WebSocket. TCP
//! connections map onto [`StreamEndpoint`]; a UDP peer maps onto a
//! [`DatagramEndpoint`] fed by the multiplexer.

use crate::helper::DEFAULT_BUFFER_SIZE;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// Local side of a session, split into independently driven halves so a
/// slow reader in one direction never stalls the other
pub trait LocalEndpoint: Send + 'static {
    /// Half yielding data headed for the remote
    type Reader: LocalReader;
    /// Half delivering data from the remote
    type Writer: LocalWriter;

    /// Split into reader and writer halves
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Byte source on the local side.
///
/// `recv` must be cancel safe: it is polled inside `select!`.
#[async_trait]
pub trait LocalReader: Send + 'static {
    /// Next chunk of local data, `None` once the local side is done
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;
}

/// Byte sink on the local side
#[async_trait]
pub trait LocalWriter: Send + 'static {
    /// Deliver data from the remote
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Release the local side
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Endpoint over a byte stream such as an accepted TCP connection
#[derive(Debug)]
pub struct StreamEndpoint<S> {
    stream: S,
}

impl<S> StreamEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap `stream`
    pub fn new(stream: S) -> Self {
        StreamEndpoint { stream }
    }
}

impl StreamEndpoint<TcpStream> {
    /// Wrap an accepted TCP connection with Nagle disabled
    pub fn tcp(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> LocalEndpoint for StreamEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = StreamReader<S>;
    type Writer = StreamWriter<S>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (read, write) = tokio::io::split(self.stream);
        (
            StreamReader {
                half: read,
                buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            },
            StreamWriter { half: write },
        )
    }
}

/// Read half of a [`StreamEndpoint`]
#[derive(Debug)]
pub struct StreamReader<S> {
    half: ReadHalf<S>,
    buffer: Vec<u8>,
}

#[async_trait]
impl<S> LocalReader for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        let n = self.half.read(&mut self.buffer).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buffer[..n])))
    }
}

/// Write half of a [`StreamEndpoint`]
#[derive(Debug)]
pub struct StreamWriter<S> {
    half: WriteHalf<S>,
}

#[async_trait]
impl<S> LocalWriter for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.half.write_all(data).await?;
        self.half.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}

/// Endpoint for one UDP peer sharing the proxy socket
#[derive(Debug)]
pub struct DatagramEndpoint {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    queue: mpsc::Receiver<Bytes>,
}

impl DatagramEndpoint {
    /// Datagrams from `peer` arrive on `queue`; replies go out through `socket`
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, queue: mpsc::Receiver<Bytes>) -> Self {
        DatagramEndpoint {
            socket,
            peer,
            queue,
        }
    }

    /// The peer this endpoint serves
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl LocalEndpoint for DatagramEndpoint {
    type Reader = DatagramReader;
    type Writer = DatagramWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            DatagramReader { queue: self.queue },
            DatagramWriter {
                socket: self.socket,
                peer: self.peer,
            },
        )
    }
}

/// Queue of datagrams from one peer. Dropping it closes the queue.
#[derive(Debug)]
pub struct DatagramReader {
    queue: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl LocalReader for DatagramReader {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.queue.recv().await)
    }
}

/// Replies to one peer through the shared socket
#[derive(Debug)]
pub struct DatagramWriter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl LocalWriter for DatagramWriter {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.socket.send_to(data, self.peer).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}
