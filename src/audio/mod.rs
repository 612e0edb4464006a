//! PCM side of the pipeline: pacing and block reads

pub mod buffer;
pub mod feeding;
pub mod source;

pub use buffer::{create_shared_ring, PcmRing, PcmRingReader, SharedPcmRing};
pub use feeding::{FeedingState, FramesDue};
pub use source::{PcmReader, PcmSupply};
