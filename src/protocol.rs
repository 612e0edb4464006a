//! Media packet wire format
//!
//! ```text
//!  0        1        2                 6
//! +--------+--------+--------+--------+---------------------+
//! |  seq   |  hdr   |    timestamp (u32 LE, samples)   | payload ...
//! +--------+--------+--------+--------+---------------------+
//!
//! hdr:  F S L T N N N N
//!       | | | | +------ frame count (saturates at 15)
//!       | | | +-------- low-latency mode
//!       | | +---------- last packet of a fragmented group
//!       | +------------ first packet of a fragmented group
//!       +-------------- fragmented group
//! ```

use bytes::{BufMut, Bytes};

use crate::error::TransportError;

/// Bytes reserved in front of every payload
pub const HEADER_LEN: usize = 6;

pub const HDR_FRAGMENT: u8 = 0x80;
pub const HDR_START: u8 = 0x40;
pub const HDR_LAST: u8 = 0x20;
pub const HDR_LOW_LATENCY: u8 = 0x10;
pub const HDR_NUM_MASK: u8 = 0x0F;

/// Decoded media payload header byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadHeader {
    pub fragmented: bool,
    pub start: bool,
    pub last: bool,
    pub low_latency: bool,
    /// Frame count carried by this packet (0 on fragment continuations)
    pub frames: u8,
}

impl PayloadHeader {
    /// Header for a tick that fits in one packet
    pub fn single(frames: u32, low_latency: bool) -> Self {
        Self {
            frames: saturate_frames(frames),
            low_latency,
            ..Self::default()
        }
    }

    /// Header for packet `index` of a fragmented group of `count` packets
    pub fn fragment(index: usize, count: usize, frames: u32, low_latency: bool) -> Self {
        let start = index == 0;
        Self {
            fragmented: true,
            start,
            last: index + 1 == count,
            low_latency,
            frames: if start { saturate_frames(frames) } else { 0 },
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.frames & HDR_NUM_MASK;
        if self.fragmented {
            byte |= HDR_FRAGMENT;
        }
        if self.start {
            byte |= HDR_START;
        }
        if self.last {
            byte |= HDR_LAST;
        }
        if self.low_latency {
            byte |= HDR_LOW_LATENCY;
        }
        byte
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            fragmented: byte & HDR_FRAGMENT != 0,
            start: byte & HDR_START != 0,
            last: byte & HDR_LAST != 0,
            low_latency: byte & HDR_LOW_LATENCY != 0,
            frames: byte & HDR_NUM_MASK,
        }
    }
}

fn saturate_frames(frames: u32) -> u8 {
    frames.min(HDR_NUM_MASK as u32) as u8
}

/// Write the fixed header into the first [`HEADER_LEN`] bytes of `dst`.
pub fn write_header(dst: &mut [u8], sequence: u8, header: PayloadHeader, timestamp: u32) {
    let mut out = &mut dst[..HEADER_LEN];
    out.put_u8(sequence);
    out.put_u8(header.to_byte());
    out.put_u32_le(timestamp);
}

/// A complete media packet, header included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    data: Bytes,
}

impl MediaPacket {
    /// Wrap an already framed datagram after checking its length.
    pub fn parse(data: Bytes) -> Result<Self, TransportError> {
        if data.len() < HEADER_LEN {
            return Err(TransportError::PacketTooShort(data.len()));
        }
        Ok(Self { data })
    }

    pub(crate) fn from_framed(data: Bytes) -> Self {
        debug_assert!(data.len() >= HEADER_LEN);
        Self { data }
    }

    pub fn sequence(&self) -> u8 {
        self.data[0]
    }

    pub fn header(&self) -> PayloadHeader {
        PayloadHeader::from_byte(self.data[1])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_le_bytes([self.data[2], self.data[3], self.data[4], self.data[5]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    /// Whole datagram, header included
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Datagram length, header included
    pub fn wire_len(&self) -> usize {
        self.data.len()
    }

    pub fn payload_len(&self) -> usize {
        self.data.len() - HEADER_LEN
    }

    /// True when the packet carries no payload bytes
    pub fn is_empty(&self) -> bool {
        self.payload_len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn framed(sequence: u8, header: PayloadHeader, timestamp: u32, payload: &[u8]) -> MediaPacket {
        let mut buf = BytesMut::zeroed(HEADER_LEN);
        buf.extend_from_slice(payload);
        write_header(&mut buf, sequence, header, timestamp);
        MediaPacket::parse(buf.freeze()).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let packet = framed(7, PayloadHeader::single(3, false), 0x0102_0304, b"abc");
        assert_eq!(&packet.as_bytes()[..], &[7, 0x03, 0x04, 0x03, 0x02, 0x01, b'a', b'b', b'c']);
        assert_eq!(packet.sequence(), 7);
        assert_eq!(packet.timestamp(), 0x0102_0304);
        assert_eq!(packet.payload(), b"abc");
    }

    #[test]
    fn test_fragment_flags() {
        let first = PayloadHeader::fragment(0, 3, 2, false);
        let middle = PayloadHeader::fragment(1, 3, 2, false);
        let last = PayloadHeader::fragment(2, 3, 2, true);

        assert_eq!(first.to_byte(), HDR_FRAGMENT | HDR_START | 2);
        assert_eq!(middle.to_byte(), HDR_FRAGMENT);
        assert_eq!(last.to_byte(), HDR_FRAGMENT | HDR_LAST | HDR_LOW_LATENCY);
    }

    #[test]
    fn test_frame_count_saturates() {
        let header = PayloadHeader::single(40, false);
        assert_eq!(header.frames, 15);
        assert_eq!(PayloadHeader::from_byte(header.to_byte()), header);
    }

    #[test]
    fn test_parse_rejects_short_packets() {
        let result = MediaPacket::parse(Bytes::from_static(&[1, 2, 3]));
        assert!(matches!(result, Err(TransportError::PacketTooShort(3))));
    }

    #[test]
    fn test_header_only_packet_lengths() {
        let packet = MediaPacket::parse(Bytes::from_static(&[7, 0x01, 0, 0, 0, 0])).unwrap();
        assert_eq!(packet.wire_len(), HEADER_LEN);
        assert_eq!(packet.payload_len(), 0);
        assert!(packet.is_empty());

        let packet = MediaPacket::parse(Bytes::from_static(&[7, 0x01, 0, 0, 0, 0, 0xAA])).unwrap();
        assert_eq!(packet.wire_len(), HEADER_LEN + 1);
        assert_eq!(packet.payload_len(), 1);
        assert!(!packet.is_empty());
    }
}
