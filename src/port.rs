//! Local port allocation
//!
//! Scans an inclusive range in ascending order and returns the first port
//! that can be bound on the requested protocol. Every call starts again from
//! the bottom of the range, so repeated calls with nothing bound in between
//! return the same port.
//!
//! The probe socket is closed before the caller binds for real; another
//! process may grab the port in between.

use crate::config::PortRange;
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, trace};

/// Transport protocol of the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// TCP listener
    Tcp,
    /// UDP socket
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Find the first free port in `range` on `bind`.
///
/// Returns `None` if every port in the range is taken or `bind` does not
/// resolve.
pub async fn find_available_port(range: PortRange, bind: &str, protocol: Protocol) -> Option<u16> {
    let bind = bind.to_string();
    // socket2 probes are blocking syscalls
    tokio::task::spawn_blocking(move || scan(range, &bind, protocol))
        .await
        .ok()
        .flatten()
}

fn scan(range: PortRange, bind: &str, protocol: Protocol) -> Option<u16> {
    if range.is_empty() {
        return None;
    }

    let mut addr = match resolve_bind(bind) {
        Some(addr) => addr,
        None => {
            debug!("Cannot resolve bind address {}", bind);
            return None;
        }
    };

    for port in range.min..=range.max {
        addr.set_port(port);
        match probe(addr, protocol) {
            Ok(()) => {
                debug!("Found available {} port {}", protocol, port);
                return Some(port);
            }
            Err(e) => trace!("{} port {} unavailable: {}", protocol, port, e),
        }
    }

    None
}

/// Resolve `bind` once; the scan only changes the port
fn resolve_bind(bind: &str) -> Option<SocketAddr> {
    (bind, 0).to_socket_addrs().ok().and_then(|mut addrs| addrs.next())
}

fn probe(addr: SocketAddr, protocol: Protocol) -> io::Result<()> {
    let domain = Domain::for_address(addr);
    let socket = match protocol {
        Protocol::Tcp => Socket::new(domain, Type::STREAM, Some(SockProtocol::TCP))?,
        Protocol::Udp => Socket::new(domain, Type::DGRAM, Some(SockProtocol::UDP))?,
    };
    socket.bind(&SockAddr::from(addr))?;
    if protocol == Protocol::Tcp {
        socket.listen(1)?;
    }
    drop(socket);
    Ok(())
}
