//! Receive-side reassembly
//!
//! Joins fragmented packet groups back into the encoded bytes of one tick
//! and tracks sequence gaps. A group with a missing packet is discarded as
//! a whole; there is no retransmission to wait for.

use bytes::{Bytes, BytesMut};

use crate::protocol::{MediaPacket, HEADER_LEN};

/// Encoded output of one sender tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledFrame {
    pub timestamp: u32,
    /// Frame count from the group header
    pub frames: u8,
    pub payload: Bytes,
    /// Number of packets the group arrived in
    pub packets: usize,
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub packets_received: u64,
    /// Packets missing according to sequence numbers
    pub packets_lost: u64,
    pub groups_completed: u64,
    /// Fragment groups discarded because a piece was missing
    pub groups_discarded: u64,
}

struct PartialGroup {
    timestamp: u32,
    frames: u8,
    payload: BytesMut,
    packets: usize,
}

/// Stateful packet reassembler
#[derive(Default)]
pub struct Reassembler {
    expected_sequence: Option<u8>,
    partial: Option<PartialGroup>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet. Returns a frame when the packet completes one.
    pub fn push(&mut self, packet: &MediaPacket) -> Option<ReassembledFrame> {
        self.stats.packets_received += 1;

        let sequence = packet.sequence();
        if let Some(expected) = self.expected_sequence {
            let gap = sequence.wrapping_sub(expected);
            if gap != 0 {
                tracing::debug!(expected, sequence, "Sequence gap");
                self.stats.packets_lost += gap as u64;
                self.discard_partial();
            }
        }
        self.expected_sequence = Some(sequence.wrapping_add(1));

        let header = packet.header();
        if !header.fragmented {
            self.discard_partial();
            self.stats.groups_completed += 1;
            return Some(ReassembledFrame {
                timestamp: packet.timestamp(),
                frames: header.frames,
                payload: packet.as_bytes().slice(HEADER_LEN..),
                packets: 1,
            });
        }

        if header.start {
            self.discard_partial();
            let mut payload = BytesMut::with_capacity(packet.payload().len() * 2);
            payload.extend_from_slice(packet.payload());
            self.partial = Some(PartialGroup {
                timestamp: packet.timestamp(),
                frames: header.frames,
                payload,
                packets: 1,
            });
        } else {
            match self.partial.as_mut() {
                Some(group) if group.timestamp == packet.timestamp() => {
                    group.payload.extend_from_slice(packet.payload());
                    group.packets += 1;
                }
                // Continuation without its start
                _ => {
                    self.discard_partial();
                    self.stats.groups_discarded += 1;
                    return None;
                }
            }
        }

        if header.last {
            let group = self.partial.take()?;
            self.stats.groups_completed += 1;
            return Some(ReassembledFrame {
                timestamp: group.timestamp,
                frames: group.frames,
                payload: group.payload.freeze(),
                packets: group.packets,
            });
        }
        None
    }

    fn discard_partial(&mut self) {
        if self.partial.take().is_some() {
            self.stats.groups_discarded += 1;
        }
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }
}
