//! UDP transport

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::error::TransportError;
use crate::network::PacketSink;
use crate::protocol::MediaPacket;

/// Send/receive buffer size requested from the OS
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Create a non-blocking UDP socket bound to `bind_addr`
pub fn create_socket(bind_addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    let domain = Domain::for_address(bind_addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;
    // Best effort; the OS may clamp these.
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);

    socket
        .bind(&bind_addr.into())
        .map_err(|e| TransportError::BindFailed(format!("{}: {}", bind_addr, e)))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}

/// Sink writing each packet straight to a UDP peer
///
/// A send that would block is reported as backpressure. Other send errors
/// drop the packet and are counted.
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
    packets_sent: u64,
    bytes_sent: u64,
    send_errors: u64,
}

impl UdpSink {
    pub fn new(socket: UdpSocket, target: SocketAddr) -> Self {
        Self {
            socket,
            target,
            packets_sent: 0,
            bytes_sent: 0,
            send_errors: 0,
        }
    }

    pub fn bind(bind_addr: SocketAddr, target: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self::new(create_socket(bind_addr)?, target))
    }

    pub fn send(&mut self, packet: &MediaPacket) -> io::Result<usize> {
        let sent = self.socket.send_to(packet.as_bytes(), self.target)?;
        self.packets_sent += 1;
        self.bytes_sent += sent as u64;
        Ok(sent)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }
}

impl PacketSink for UdpSink {
    fn enqueue(&mut self, packet: MediaPacket, _frames: u32) -> bool {
        match self.send(&packet) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                self.send_errors += 1;
                tracing::warn!("Failed to send packet to {}: {}", self.target, e);
                true
            }
        }
    }
}
