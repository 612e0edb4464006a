//! # A2DP Packetizer
//!
//! Frame pacing and MTU-bounded packet assembly for a Bluetooth A2DP style
//! encoder path.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          HOST (every 20 ms)                           │
//! │                     EncoderSession::on_tick(now)                      │
//! └───────────────────────────────────┬───────────────────────────────────┘
//!                                     │
//!                                     ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Rate accumulator (audio::feeding)                                    │
//! │    counter += bytes_per_tick * elapsed / interval                     │
//! │    frames   = counter / bytes_per_frame                               │
//! └───────────────────────────────────┬───────────────────────────────────┘
//!                                     │ N frames due
//!                                     ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Packet assembler (packetizer)                                        │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────────────────┐  │
//! │  │ PCM reader  │──►│FrameEncoder │──►│ open packet ≤ max_payload   │  │
//! │  │ (pad short) │   │block/stream │   │ full → close, open next     │  │
//! │  └─────────────┘   └─────────────┘   └──────────────┬──────────────┘  │
//! │                                                     │                 │
//! │              tag headers: single │ start … last, stamp timestamp      │
//! └─────────────────────────────────────────────────────┼─────────────────┘
//!                                                       │
//!                                                       ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  PacketSink (network)                                                 │
//! │    [Seq|F S L T NNNN|Timestamp LE|payload]                            │
//! │    false = backpressure, stop emitting for this tick                  │
//! └───────────────────────────────────┬───────────────────────────────────┘
//!                                     │ UDP
//!                                     ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Reassembler (network::receiver): join fragments, count gaps          │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod packetizer;
pub mod protocol;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use session::{ConfigUpdate, EncoderSession, TickReport};

/// Application-wide constants
pub mod constants {
    /// Nominal interval between encoder ticks
    pub const TICK_INTERVAL_MS: u32 = 20;

    /// Largest packet the local transmit buffer can hold
    pub const MAX_BUFFER_MTU: usize = 1024;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u8 = 2;

    /// Default PCM sample width
    pub const DEFAULT_BITS_PER_SAMPLE: u8 = 16;

    /// Default peer MTU, typical for an L2CAP media channel
    pub const DEFAULT_PEER_MTU: u16 = 895;

    /// Default UDP port for the demo link
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Packets the transmit queue holds before pushing back
    pub const DEFAULT_TX_QUEUE_DEPTH: usize = 64;

    /// PCM ring capacity (in chunks)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Maximum UDP datagram accepted by the receiver
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers
}
