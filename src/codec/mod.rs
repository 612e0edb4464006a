//! Codec front end
//!
//! The compression algorithm itself is external. This module defines the
//! two call shapes such codecs come in and folds both into one
//! [`FrameEncoder`] the packet assembler can drive without caring which one
//! is active:
//!
//! - [`BlockCodec`]: every PCM block produces exactly one encoded frame.
//! - [`StreamCodec`]: blocks are buffered internally; a call may produce
//!   zero or more frames and reports how many.

pub mod encoder;
pub mod loader;

pub use encoder::{OpusBlockCodec, OpusFactory, OpusLoader, OpusStreamCodec};
pub use loader::{CodecFactory, CodecLoader};

use crate::error::CodecError;

/// Codec producing one encoded frame per PCM block
pub trait BlockCodec: Send {
    fn name(&self) -> &'static str;

    /// PCM samples per channel in one input block
    fn block_samples(&self) -> u32;

    /// Upper bound on the bytes written by one call
    fn max_output_len(&self) -> usize;

    /// Encode one block into `out`, returning the bytes written.
    fn encode_block(&mut self, pcm: &[u8], out: &mut [u8]) -> Result<usize, CodecError>;

    /// Current transmission bitrate in bits per second, when known
    fn bitrate(&self) -> Option<u32> {
        None
    }
}

/// Result of one [`StreamCodec::encode`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOutput {
    pub written: usize,
    pub frames: u32,
}

/// Codec that buffers input and emits frames on its own schedule
pub trait StreamCodec: Send {
    fn name(&self) -> &'static str;

    /// PCM samples per channel in one input block
    fn block_samples(&self) -> u32;

    /// PCM samples per channel represented by one output frame
    fn frame_samples(&self) -> u32;

    /// Upper bound on the bytes written by one call
    fn max_output_len(&self) -> usize;

    fn encode(&mut self, pcm: &[u8], out: &mut [u8]) -> Result<StreamOutput, CodecError>;

    fn bitrate(&self) -> Option<u32> {
        None
    }
}

/// Encoded output of one PCM block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded<'a> {
    /// May be empty when the codec is still buffering
    pub data: &'a [u8],
    /// Codec frames completed by this call
    pub frames: u32,
}

/// Uniform encoder handle used by the session
pub enum FrameEncoder {
    Block {
        codec: Box<dyn BlockCodec>,
        scratch: Vec<u8>,
    },
    Stream {
        codec: Box<dyn StreamCodec>,
        scratch: Vec<u8>,
    },
}

impl FrameEncoder {
    pub fn block(codec: impl BlockCodec + 'static) -> Self {
        let scratch = vec![0u8; codec.max_output_len()];
        Self::Block {
            codec: Box::new(codec),
            scratch,
        }
    }

    pub fn stream(codec: impl StreamCodec + 'static) -> Self {
        let scratch = vec![0u8; codec.max_output_len()];
        Self::Stream {
            codec: Box::new(codec),
            scratch,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Block { codec, .. } => codec.name(),
            Self::Stream { codec, .. } => codec.name(),
        }
    }

    /// PCM samples per channel the encoder wants per call
    pub fn block_samples(&self) -> u32 {
        match self {
            Self::Block { codec, .. } => codec.block_samples(),
            Self::Stream { codec, .. } => codec.block_samples(),
        }
    }

    /// Samples per channel covered by one reported frame, used to advance
    /// the media timestamp
    pub fn samples_per_frame(&self) -> u32 {
        match self {
            Self::Block { codec, .. } => codec.block_samples(),
            Self::Stream { codec, .. } => codec.frame_samples(),
        }
    }

    pub fn bitrate(&self) -> Option<u32> {
        match self {
            Self::Block { codec, .. } => codec.bitrate(),
            Self::Stream { codec, .. } => codec.bitrate(),
        }
    }

    /// Encode one PCM block. Failures are returned as-is; nothing is
    /// retried.
    pub fn encode(&mut self, pcm: &[u8]) -> Result<Encoded<'_>, CodecError> {
        match self {
            Self::Block { codec, scratch } => {
                let written = codec.encode_block(pcm, scratch)?;
                check_written(written, scratch.len())?;
                Ok(Encoded {
                    data: &scratch[..written],
                    frames: 1,
                })
            }
            Self::Stream { codec, scratch } => {
                let output = codec.encode(pcm, scratch)?;
                check_written(output.written, scratch.len())?;
                Ok(Encoded {
                    data: &scratch[..output.written],
                    frames: output.frames,
                })
            }
        }
    }
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Block { .. } => "block",
            Self::Stream { .. } => "stream",
        };
        f.debug_struct("FrameEncoder")
            .field("codec", &self.name())
            .field("shape", &shape)
            .field("block_samples", &self.block_samples())
            .finish()
    }
}

fn check_written(written: usize, available: usize) -> Result<(), CodecError> {
    if written > available {
        return Err(CodecError::OutputTooSmall {
            needed: written,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted codecs for exercising the assembler.

    use super::*;
    use std::collections::VecDeque;

    /// Block codec emitting a fixed-size frame filled with a running byte.
    pub struct FixedCodec {
        pub block_samples: u32,
        pub frame_len: usize,
        pub next: u8,
        pub fail_on_call: Option<usize>,
        pub calls: usize,
    }

    impl FixedCodec {
        pub fn new(block_samples: u32, frame_len: usize) -> Self {
            Self {
                block_samples,
                frame_len,
                next: 0,
                fail_on_call: None,
                calls: 0,
            }
        }
    }

    impl BlockCodec for FixedCodec {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn block_samples(&self) -> u32 {
            self.block_samples
        }

        fn max_output_len(&self) -> usize {
            self.frame_len
        }

        fn encode_block(&mut self, _pcm: &[u8], out: &mut [u8]) -> Result<usize, CodecError> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(CodecError::EncodingFailed("scripted failure".into()));
            }
            for byte in &mut out[..self.frame_len] {
                *byte = self.next;
                self.next = self.next.wrapping_add(1);
            }
            Ok(self.frame_len)
        }
    }

    /// Stream codec replaying a script of (bytes, frames) outputs.
    pub struct ScriptedStream {
        pub block_samples: u32,
        pub frame_samples: u32,
        pub script: VecDeque<(usize, u32)>,
        pub next: u8,
    }

    impl StreamCodec for ScriptedStream {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn block_samples(&self) -> u32 {
            self.block_samples
        }

        fn frame_samples(&self) -> u32 {
            self.frame_samples
        }

        fn max_output_len(&self) -> usize {
            4096
        }

        fn encode(&mut self, _pcm: &[u8], out: &mut [u8]) -> Result<StreamOutput, CodecError> {
            let (written, frames) = self.script.pop_front().unwrap_or((0, 0));
            for byte in &mut out[..written] {
                *byte = self.next;
                self.next = self.next.wrapping_add(1);
            }
            Ok(StreamOutput { written, frames })
        }
    }
}
