//! UDP broadcast transport.
//!
//! Two thin halves over one datagram socket pair: [`BroadcastSend`] fires
//! best-effort datagrams at the broadcast address, [`BroadcastRecv`] yields
//! every datagram arriving on the bind address together with its source.
//! The transport does no semantic filtering; the manager decides what a
//! datagram means.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// A datagram as it came off the wire, with the sender's address.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub source: IpAddr,
    pub payload: Vec<u8>,
}

// ── Sending ───────────────────────────────────────────────────────────────────

/// Outbound half: synchronous, best-effort sends to one broadcast address.
pub struct BroadcastSend {
    socket: StdUdpSocket,
    dest: SocketAddr,
}

impl BroadcastSend {
    /// Create a socket aimed at `dest`.
    pub fn open(dest: SocketAddr) -> io::Result<Self> {
        let socket = make_send_socket(dest)?;
        Ok(Self {
            socket: socket.into(),
            dest,
        })
    }

    /// Send one datagram. Failures are logged and swallowed: discovery is
    /// best-effort and a lost announcement is repaired by a later REQUEST.
    pub fn send(&self, payload: &[u8]) {
        match self.socket.send_to(payload, self.dest) {
            Ok(n) => tracing::trace!(bytes = n, dest = %self.dest, "broadcast sent"),
            Err(e) => tracing::warn!(error = %e, dest = %self.dest, "broadcast send failed"),
        }
    }

    /// The broadcast address datagrams are sent to.
    pub fn dest(&self) -> SocketAddr {
        self.dest
    }
}

/// Create a UDP socket suitable for sending broadcast datagrams.
fn make_send_socket(dest: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(dest), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    if dest.is_ipv4() {
        // SO_BROADCAST is required to address 255.255.255.255 or a subnet
        // broadcast address; harmless for plain unicast destinations.
        socket.set_broadcast(true)?;
    }

    Ok(socket)
}

// ── Receiving ─────────────────────────────────────────────────────────────────

/// Inbound half: an async socket bound to the discovery port.
pub struct BroadcastRecv {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl BroadcastRecv {
    /// Bind the receive socket. Must be called within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = make_recv_socket(addr)?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self {
            socket,
            buf: vec![0u8; 1024],
        })
    }

    /// The address this receiver actually listens on. With an ephemeral
    /// bind port this is how peers learn where to reach it.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for the next datagram.
    pub async fn recv(&mut self) -> io::Result<Datagram> {
        let (len, peer) = self.socket.recv_from(&mut self.buf).await?;
        Ok(Datagram {
            source: peer.ip(),
            payload: self.buf[..len].to_vec(),
        })
    }
}

/// Create a UDP socket bound for receiving broadcast datagrams.
fn make_recv_socket(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    // SO_REUSEADDR so several peers on one host can share the well-known port.
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
