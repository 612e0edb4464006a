//! Packet assembler
//!
//! Turns the frames due for one tick into MTU-bounded packets. Encoded
//! bytes are copied into the open packet until it holds `max_payload`
//! bytes, at which point it is closed and a fresh one is opened, so a
//! single frame may span any number of packets. Every packet except the
//! last of a tick is exactly full.
//!
//! Headers are written only once the whole tick is assembled, because the
//! flags depend on how many packets the tick ended up needing.

use bytes::Bytes;

use crate::audio::{PcmReader, PcmSupply};
use crate::codec::FrameEncoder;
use crate::error::TickError;
use crate::protocol::{write_header, MediaPacket, PayloadHeader, HEADER_LEN};
use crate::stats::EncoderStats;

/// Packets and bookkeeping produced by one assembly pass
#[derive(Debug)]
pub struct Batch {
    /// Closed packet buffers, header space reserved but not yet written
    packets: Vec<Vec<u8>>,
    /// PCM blocks read and handed to the codec
    pub blocks_read: u32,
    /// Codec frames completed during the pass
    pub frames_produced: u32,
    /// Encoded bytes placed into packets
    pub encoded_bytes: usize,
    /// Packet buffers thrown away because the pass failed
    pub discarded: usize,
    pub outcome: Result<(), TickError>,
}

impl Batch {
    fn new() -> Self {
        Self {
            packets: Vec::new(),
            blocks_read: 0,
            frames_produced: 0,
            encoded_bytes: 0,
            discarded: 0,
            outcome: Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Payload sizes of the packets in emission order
    pub fn payload_lens(&self) -> impl Iterator<Item = usize> + '_ {
        self.packets.iter().map(|p| p.len() - HEADER_LEN)
    }

    /// Write headers and freeze the packets.
    ///
    /// Sequence numbers start at `first_sequence` and wrap at 256. Every
    /// packet carries the same `timestamp`. Returns each packet with the
    /// number of frames it starts: the full count on the single or first
    /// packet, zero on continuations. Only the header field saturates.
    pub fn into_packets(
        self,
        first_sequence: u8,
        timestamp: u32,
        low_latency: bool,
    ) -> Vec<(MediaPacket, u32)> {
        let count = self.packets.len();
        let frames = self.frames_produced;

        self.packets
            .into_iter()
            .enumerate()
            .map(|(index, mut buf)| {
                let header = if count == 1 {
                    PayloadHeader::single(frames, low_latency)
                } else {
                    PayloadHeader::fragment(index, count, frames, low_latency)
                };
                let sequence = first_sequence.wrapping_add(index as u8);
                write_header(&mut buf, sequence, header, timestamp);
                let started = if index == 0 { frames } else { 0 };
                (MediaPacket::from_framed(Bytes::from(buf)), started)
            })
            .collect()
    }
}

/// Reusable assembly state for one session
pub struct PacketAssembler {
    mtu: usize,
    /// PCM read buffer, one codec block
    block: Vec<u8>,
    /// Packet being filled; empty when no packet is open
    open: Vec<u8>,
    closed: Vec<Vec<u8>>,
}

impl PacketAssembler {
    pub fn new(mtu: usize, block_bytes: usize) -> Self {
        debug_assert!(mtu > HEADER_LEN);
        Self {
            mtu,
            block: vec![0u8; block_bytes],
            open: Vec::new(),
            closed: Vec::new(),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.mtu - HEADER_LEN
    }

    pub fn block_bytes(&self) -> usize {
        self.block.len()
    }

    /// Read, encode and packetize `frames` PCM blocks.
    ///
    /// An underflow keeps whatever was assembled before it. A codec or
    /// allocation failure discards every packet of the pass.
    pub fn assemble<S: PcmSupply>(
        &mut self,
        frames: u32,
        reader: &mut PcmReader<S>,
        encoder: Option<&mut FrameEncoder>,
        stats: &mut EncoderStats,
    ) -> Batch {
        self.open.clear();
        self.closed.clear();

        let mut batch = Batch::new();
        let outcome = self.fill(frames, reader, encoder, stats, &mut batch);

        match &outcome {
            Ok(()) | Err(TickError::Underflow { .. }) => {
                self.close_open();
                batch.packets = std::mem::take(&mut self.closed);
            }
            Err(_) => {
                batch.discarded = self.closed.len() + usize::from(!self.open.is_empty());
                self.open.clear();
                self.closed.clear();
            }
        }
        batch.outcome = outcome;
        batch
    }

    fn fill<S: PcmSupply>(
        &mut self,
        frames: u32,
        reader: &mut PcmReader<S>,
        encoder: Option<&mut FrameEncoder>,
        stats: &mut EncoderStats,
        batch: &mut Batch,
    ) -> Result<(), TickError> {
        let Some(encoder) = encoder else {
            return Err(TickError::InvalidHandle);
        };

        for done in 0..frames {
            if reader.read_block(&mut self.block, stats).is_err() {
                return Err(TickError::Underflow {
                    frames_left: frames - done,
                });
            }
            batch.blocks_read += 1;

            let encoded = encoder
                .encode(&self.block)
                .map_err(|e| TickError::CodecFailure(e.to_string()))?;
            batch.frames_produced += encoded.frames;
            batch.encoded_bytes += encoded.data.len();

            // An empty chunk means the codec is still buffering.
            self.append(encoded.data, stats)?;
        }
        Ok(())
    }

    /// Copy `data` into packets, closing each one as it fills up.
    fn append(&mut self, mut data: &[u8], stats: &mut EncoderStats) -> Result<(), TickError> {
        while !data.is_empty() {
            if self.open.is_empty() {
                self.open = new_packet(self.mtu, stats)?;
            }

            let room = self.mtu - self.open.len();
            let n = room.min(data.len());
            self.open.extend_from_slice(&data[..n]);
            data = &data[n..];

            if self.open.len() == self.mtu {
                self.closed.push(std::mem::take(&mut self.open));
            }
        }
        Ok(())
    }

    fn close_open(&mut self) {
        if self.open.len() > HEADER_LEN {
            self.closed.push(std::mem::take(&mut self.open));
        }
        self.open.clear();
    }
}

/// Allocate a packet buffer with the header space reserved.
fn new_packet(mtu: usize, stats: &mut EncoderStats) -> Result<Vec<u8>, TickError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(mtu)
        .map_err(|_| TickError::AllocationFailure(mtu))?;
    buf.resize(HEADER_LEN, 0);
    stats.expected_packets += 1;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{FixedCodec, ScriptedStream};
    use crate::protocol::{HDR_FRAGMENT, HDR_LAST, HDR_START};
    use proptest::prelude::*;

    const BLOCK: usize = 512;

    fn reader() -> PcmReader<impl FnMut(&mut [u8]) -> usize> {
        PcmReader::new(|buf: &mut [u8]| buf.len())
    }

    fn assemble(mtu: usize, frames: u32, frame_len: usize) -> Batch {
        let mut assembler = PacketAssembler::new(mtu, BLOCK);
        let mut encoder = FrameEncoder::block(FixedCodec::new(128, frame_len));
        let mut stats = EncoderStats::default();
        assembler.assemble(frames, &mut reader(), Some(&mut encoder), &mut stats)
    }

    #[test]
    fn test_large_frame_is_fragmented() {
        let batch = assemble(663 + HEADER_LEN, 1, 1500);
        assert!(batch.outcome.is_ok());
        assert_eq!(batch.payload_lens().collect::<Vec<_>>(), vec![663, 663, 174]);

        let packets = batch.into_packets(41, 0, false);
        let flags: Vec<u8> = packets.iter().map(|(p, _)| p.header().to_byte() & 0xE0).collect();
        assert_eq!(
            flags,
            vec![HDR_FRAGMENT | HDR_START, HDR_FRAGMENT, HDR_FRAGMENT | HDR_LAST]
        );
        let sequences: Vec<u8> = packets.iter().map(|(p, _)| p.sequence()).collect();
        assert_eq!(sequences, vec![41, 42, 43]);
        assert_eq!(packets[0].1, 1);
        assert_eq!(packets[1].1, 0);
    }

    #[test]
    fn test_small_frame_fits_one_packet() {
        let batch = assemble(663 + HEADER_LEN, 1, 400);
        let packets = batch.into_packets(0, 0, false);
        assert_eq!(packets.len(), 1);

        let header = packets[0].0.header();
        assert!(!header.fragmented && !header.start && !header.last);
        assert_eq!(header.frames, 1);
        assert_eq!(packets[0].0.payload().len(), 400);
    }

    #[test]
    fn test_frames_share_packets() {
        // Five 300-byte frames into 663-byte payloads: 663, 663, 174
        let batch = assemble(663 + HEADER_LEN, 5, 300);
        assert_eq!(batch.payload_lens().collect::<Vec<_>>(), vec![663, 663, 174]);
        assert_eq!(batch.frames_produced, 5);
        assert_eq!(batch.blocks_read, 5);
    }

    #[test]
    fn test_exact_fit_has_no_empty_tail() {
        let batch = assemble(100 + HEADER_LEN, 2, 100);
        assert_eq!(batch.payload_lens().collect::<Vec<_>>(), vec![100, 100]);
    }

    #[test]
    fn test_zero_frames_builds_nothing() {
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(100, BLOCK);
        let mut encoder = FrameEncoder::block(FixedCodec::new(128, 10));
        let batch = assembler.assemble(0, &mut reader(), Some(&mut encoder), &mut stats);
        assert!(batch.is_empty());
        assert_eq!(stats.expected_reads, 0);
        assert_eq!(stats.expected_packets, 0);
    }

    #[test]
    fn test_buffering_codec_keeps_reading() {
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(100, BLOCK);
        let mut encoder = FrameEncoder::stream(ScriptedStream {
            block_samples: 128,
            frame_samples: 384,
            script: [(0, 0), (0, 0), (30, 1)].into(),
            next: 0,
        });

        let batch = assembler.assemble(3, &mut reader(), Some(&mut encoder), &mut stats);
        assert!(batch.outcome.is_ok());
        assert_eq!(batch.blocks_read, 3);
        assert_eq!(batch.frames_produced, 1);
        assert_eq!(batch.payload_lens().collect::<Vec<_>>(), vec![30]);
        assert_eq!(stats.expected_packets, 1);
    }

    #[test]
    fn test_all_buffered_builds_nothing() {
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(100, BLOCK);
        let mut encoder = FrameEncoder::stream(ScriptedStream {
            block_samples: 128,
            frame_samples: 384,
            script: [(0, 0), (0, 0)].into(),
            next: 0,
        });

        let batch = assembler.assemble(2, &mut reader(), Some(&mut encoder), &mut stats);
        assert!(batch.outcome.is_ok());
        assert!(batch.is_empty());
        assert_eq!(batch.discarded, 0);
    }

    #[test]
    fn test_underflow_keeps_assembled_packets() {
        let mut calls = 0;
        let mut reader = PcmReader::new(move |buf: &mut [u8]| {
            calls += 1;
            if calls <= 2 {
                buf.len()
            } else {
                0
            }
        });
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(100, BLOCK);
        let mut encoder = FrameEncoder::block(FixedCodec::new(128, 40));

        let batch = assembler.assemble(5, &mut reader, Some(&mut encoder), &mut stats);
        assert_eq!(batch.outcome, Err(TickError::Underflow { frames_left: 3 }));
        assert_eq!(batch.payload_lens().collect::<Vec<_>>(), vec![80]);
        assert_eq!(batch.frames_produced, 2);
    }

    #[test]
    fn test_codec_failure_discards_everything() {
        let mut codec = FixedCodec::new(128, 150);
        codec.fail_on_call = Some(2);
        let mut encoder = FrameEncoder::block(codec);
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(100, BLOCK);

        let batch = assembler.assemble(3, &mut reader(), Some(&mut encoder), &mut stats);
        assert!(matches!(batch.outcome, Err(TickError::CodecFailure(_))));
        assert!(batch.is_empty());
        // first frame filled one packet and half of a second
        assert_eq!(batch.discarded, 2);
    }

    #[test]
    fn test_allocation_failure_discards_everything() {
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(usize::MAX, BLOCK);
        let mut encoder = FrameEncoder::block(FixedCodec::new(128, 40));

        let batch = assembler.assemble(3, &mut reader(), Some(&mut encoder), &mut stats);
        assert_eq!(batch.outcome, Err(TickError::AllocationFailure(usize::MAX)));
        assert!(batch.is_empty());
        // the failing buffer was never opened
        assert_eq!(batch.discarded, 0);
        assert_eq!(batch.blocks_read, 1);
        assert_eq!(stats.expected_packets, 0);

        // the assembler is reusable once the failure is reported
        let batch = assembler.assemble(0, &mut reader(), Some(&mut encoder), &mut stats);
        assert!(batch.outcome.is_ok());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_frame_count_beyond_header_field() {
        let batch = assemble(1000, 30, 10);
        assert_eq!(batch.frames_produced, 30);

        let packets = batch.into_packets(0, 0, false);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1, 30);
        assert_eq!(packets[0].0.header().frames, 15);
    }

    #[test]
    fn test_missing_handle() {
        let mut stats = EncoderStats::default();
        let mut assembler = PacketAssembler::new(100, BLOCK);
        let batch = assembler.assemble(3, &mut reader(), None, &mut stats);
        assert_eq!(batch.outcome, Err(TickError::InvalidHandle));
        assert_eq!(stats.expected_reads, 0);
    }

    proptest! {
        #[test]
        fn prop_packets_respect_mtu_and_preserve_bytes(
            max_payload in 1usize..800,
            frames in 1u32..20,
            frame_len in 0usize..2000,
        ) {
            let mtu = max_payload + HEADER_LEN;
            let batch = assemble(mtu, frames, frame_len);
            let total = frames as usize * frame_len;
            prop_assert_eq!(batch.encoded_bytes, total);

            let lens: Vec<usize> = batch.payload_lens().collect();
            if let Some((last, full)) = lens.split_last() {
                prop_assert!(full.iter().all(|&len| len == max_payload));
                prop_assert!(*last > 0 && *last <= max_payload);
            }

            let packets = batch.into_packets(250, 9, false);
            let mut joined = Vec::new();
            for (i, (packet, _)) in packets.iter().enumerate() {
                prop_assert!(packet.wire_len() <= mtu);
                prop_assert_eq!(packet.sequence(), 250u8.wrapping_add(i as u8));
                prop_assert_eq!(packet.timestamp(), 9);
                joined.extend_from_slice(packet.payload());
            }
            let expected: Vec<u8> = (0..total).map(|i| i as u8).collect();
            prop_assert_eq!(joined, expected);
        }
    }
}
