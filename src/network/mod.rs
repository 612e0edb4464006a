//! Transport side: handing packets to the link and taking them back off

pub mod queue;
pub mod receiver;
pub mod udp;

pub use queue::{transmit_queue, TxQueue, TxQueueReceiver};
pub use receiver::{Reassembler, ReassembledFrame};
pub use udp::{create_socket, UdpSink};

use crate::protocol::MediaPacket;

/// Lower transport layer accepting finished packets
///
/// `frames` is the number of codec frames the packet starts, uncapped: the
/// whole tick's count on a single or first packet, zero on fragment
/// continuations. Returning `false` signals backpressure: the
/// packet was not taken and the caller must stop emitting for this tick.
pub trait PacketSink {
    fn enqueue(&mut self, packet: MediaPacket, frames: u32) -> bool;
}

impl<F> PacketSink for F
where
    F: FnMut(MediaPacket, u32) -> bool,
{
    fn enqueue(&mut self, packet: MediaPacket, frames: u32) -> bool {
        self(packet, frames)
    }
}

impl PacketSink for Vec<MediaPacket> {
    fn enqueue(&mut self, packet: MediaPacket, _frames: u32) -> bool {
        self.push(packet);
        true
    }
}
