//! Opus encoder adapters
//!
//! Opus stands in for the vendor codec. Two wrappers expose it in the two
//! call shapes the pipeline knows about:
//!
//! - [`OpusBlockCodec`]: hard CBR, one Opus packet per 10 ms block.
//! - [`OpusStreamCodec`]: takes small blocks, buffers them, and emits a
//!   20 ms Opus packet whenever enough samples have accumulated.

use opus::{Application, Bitrate, Channels, Encoder};

use crate::codec::loader::{CodecFactory, CodecLoader};
use crate::codec::{BlockCodec, FrameEncoder, StreamCodec, StreamOutput};
use crate::config::{CodecBackend, CodecConfig, SessionConfig};
use crate::error::CodecError;

/// Largest bitrate libopus accepts
const OPUS_MAX_BITRATE: u32 = 510_000;

/// Input block used by the streaming adapter (samples per channel)
pub const STREAM_BLOCK_SAMPLES: u32 = 128;

/// Build and configure an Opus encoder for the session parameters
fn build_encoder(
    session: &SessionConfig,
    bitrate: u32,
    vbr: bool,
) -> Result<Encoder, CodecError> {
    let channels = match session.channels {
        1 => Channels::Mono,
        2 => Channels::Stereo,
        n => {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported channel count: {}",
                n
            )))
        }
    };

    if !matches!(session.sample_rate, 8_000 | 12_000 | 16_000 | 24_000 | 48_000) {
        return Err(CodecError::UnsupportedFormat(format!(
            "Opus cannot encode at {} Hz",
            session.sample_rate
        )));
    }

    if !matches!(session.bits_per_sample, 16 | 24) {
        return Err(CodecError::UnsupportedFormat(format!(
            "{} bits per sample",
            session.bits_per_sample
        )));
    }

    let mut encoder = Encoder::new(session.sample_rate, channels, Application::Audio)
        .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

    encoder
        .set_bitrate(Bitrate::Bits(bitrate as i32))
        .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

    encoder
        .set_vbr(vbr)
        .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

    Ok(encoder)
}

/// Bitrate for a session: explicit override, else the quality mode's
/// nominal rate, clamped to what Opus supports.
fn target_bitrate(session: &SessionConfig, codec: &CodecConfig) -> u32 {
    codec
        .bitrate
        .unwrap_or(session.quality_mode.bitrate_kbps() * 1000)
        .min(OPUS_MAX_BITRATE)
}

/// Convert little-endian interleaved PCM to i16, keeping the top 16 bits of
/// wider samples.
fn pcm_to_i16(pcm: &[u8], bits_per_sample: u8, out: &mut Vec<i16>) {
    match bits_per_sample {
        24 => out.extend(
            pcm.chunks_exact(3)
                .map(|s| i16::from_le_bytes([s[1], s[2]])),
        ),
        _ => out.extend(
            pcm.chunks_exact(2)
                .map(|s| i16::from_le_bytes([s[0], s[1]])),
        ),
    }
}

/// Constant-bitrate Opus, one packet per block
pub struct OpusBlockCodec {
    encoder: Encoder,
    bits_per_sample: u8,
    block_samples: u32,
    channels: usize,
    bitrate: u32,
    /// Conversion buffer (reused to avoid allocations)
    samples: Vec<i16>,
}

impl OpusBlockCodec {
    pub fn new(session: &SessionConfig, codec: &CodecConfig) -> Result<Self, CodecError> {
        let bitrate = target_bitrate(session, codec);
        let encoder = build_encoder(session, bitrate, false)?;
        // 10 ms blocks
        let block_samples = session.sample_rate / 100;
        let channels = session.channels as usize;

        Ok(Self {
            encoder,
            bits_per_sample: session.bits_per_sample,
            block_samples,
            channels,
            bitrate,
            samples: Vec::with_capacity(block_samples as usize * channels),
        })
    }
}

impl BlockCodec for OpusBlockCodec {
    fn name(&self) -> &'static str {
        "opus-cbr"
    }

    fn block_samples(&self) -> u32 {
        self.block_samples
    }

    fn max_output_len(&self) -> usize {
        // CBR packet size plus slack for the TOC byte
        (self.bitrate as usize * self.block_samples as usize / 48_000 / 8).max(64) + 64
    }

    fn encode_block(&mut self, pcm: &[u8], out: &mut [u8]) -> Result<usize, CodecError> {
        self.samples.clear();
        pcm_to_i16(pcm, self.bits_per_sample, &mut self.samples);

        let expected = self.block_samples as usize * self.channels;
        if self.samples.len() != expected {
            return Err(CodecError::InvalidBlockSize(pcm.len()));
        }

        self.encoder
            .encode(&self.samples, out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))
    }

    fn bitrate(&self) -> Option<u32> {
        Some(self.bitrate)
    }
}

/// Variable-bitrate Opus fed with small blocks
///
/// Returns no output until a full 20 ms frame has been gathered, so most
/// calls report zero frames.
pub struct OpusStreamCodec {
    encoder: Encoder,
    bits_per_sample: u8,
    frame_samples: u32,
    channels: usize,
    bitrate: u32,
    pending: Vec<i16>,
}

impl OpusStreamCodec {
    pub fn new(session: &SessionConfig, codec: &CodecConfig) -> Result<Self, CodecError> {
        let bitrate = target_bitrate(session, codec);
        let encoder = build_encoder(session, bitrate, true)?;
        // 20 ms frames
        let frame_samples = session.sample_rate / 50;
        let channels = session.channels as usize;

        Ok(Self {
            encoder,
            bits_per_sample: session.bits_per_sample,
            frame_samples,
            channels,
            bitrate,
            pending: Vec::with_capacity(
                (frame_samples + STREAM_BLOCK_SAMPLES) as usize * channels,
            ),
        })
    }

    /// Samples (all channels) waiting for the next frame
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

impl StreamCodec for OpusStreamCodec {
    fn name(&self) -> &'static str {
        "opus-stream"
    }

    fn block_samples(&self) -> u32 {
        STREAM_BLOCK_SAMPLES
    }

    fn frame_samples(&self) -> u32 {
        self.frame_samples
    }

    fn max_output_len(&self) -> usize {
        // Maximum size of a single Opus packet
        1275
    }

    fn encode(&mut self, pcm: &[u8], out: &mut [u8]) -> Result<StreamOutput, CodecError> {
        pcm_to_i16(pcm, self.bits_per_sample, &mut self.pending);

        let frame_len = self.frame_samples as usize * self.channels;
        if self.pending.len() < frame_len {
            return Ok(StreamOutput::default());
        }

        let written = self
            .encoder
            .encode(&self.pending[..frame_len], out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        self.pending.drain(..frame_len);

        Ok(StreamOutput { written, frames: 1 })
    }

    fn bitrate(&self) -> Option<u32> {
        Some(self.bitrate)
    }
}

/// Creates Opus encoders for sessions
pub struct OpusFactory {
    config: CodecConfig,
}

impl OpusFactory {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

impl CodecFactory for OpusFactory {
    fn name(&self) -> &'static str {
        match self.config.backend {
            CodecBackend::OpusBlock => "opus-cbr",
            CodecBackend::OpusStream => "opus-stream",
        }
    }

    fn create(&self, session: &SessionConfig) -> Result<FrameEncoder, CodecError> {
        Ok(match self.config.backend {
            CodecBackend::OpusBlock => {
                FrameEncoder::block(OpusBlockCodec::new(session, &self.config)?)
            }
            CodecBackend::OpusStream => {
                FrameEncoder::stream(OpusStreamCodec::new(session, &self.config)?)
            }
        })
    }
}

/// Loader for the statically linked Opus library
#[derive(Debug, Default)]
pub struct OpusLoader {
    config: CodecConfig,
    loaded: bool,
}

impl OpusLoader {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            loaded: false,
        }
    }
}

impl CodecLoader for OpusLoader {
    fn load(&mut self) -> Result<Box<dyn CodecFactory>, CodecError> {
        if !self.loaded {
            tracing::debug!("Loading Opus encoder ({:?})", self.config.backend);
            self.loaded = true;
        }
        Ok(Box::new(OpusFactory::new(self.config.clone())))
    }

    fn unload(&mut self) {
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionConfig {
        SessionConfig {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_pcm_conversion() {
        let mut out = Vec::new();
        pcm_to_i16(&[0x34, 0x12, 0xFF, 0xFF], 16, &mut out);
        assert_eq!(out, vec![0x1234, -1]);

        out.clear();
        pcm_to_i16(&[0x00, 0x34, 0x12], 24, &mut out);
        assert_eq!(out, vec![0x1234]);
    }

    #[test]
    fn test_block_codec_encodes_silence() {
        let mut encoder = FrameEncoder::block(
            OpusBlockCodec::new(&session(), &CodecConfig::default()).unwrap(),
        );
        assert_eq!(encoder.block_samples(), 480);

        let pcm = vec![0u8; 480 * 2 * 2];
        let encoded = encoder.encode(&pcm).unwrap();
        assert!(!encoded.data.is_empty());
        assert_eq!(encoded.frames, 1);
    }

    #[test]
    fn test_block_codec_rejects_wrong_size() {
        let mut codec = OpusBlockCodec::new(&session(), &CodecConfig::default()).unwrap();
        let mut out = vec![0u8; codec.max_output_len()];
        assert!(matches!(
            codec.encode_block(&[0u8; 100], &mut out),
            Err(CodecError::InvalidBlockSize(100))
        ));
    }

    #[test]
    fn test_stream_codec_buffers_until_full_frame() {
        let mut codec = OpusStreamCodec::new(&session(), &CodecConfig::default()).unwrap();
        let mut out = vec![0u8; codec.max_output_len()];
        let block = vec![0u8; STREAM_BLOCK_SAMPLES as usize * 2 * 2];

        // 960 samples per frame, 128 per block: the 8th block completes it
        for _ in 0..7 {
            let output = codec.encode(&block, &mut out).unwrap();
            assert_eq!(output, StreamOutput::default());
        }
        let output = codec.encode(&block, &mut out).unwrap();
        assert_eq!(output.frames, 1);
        assert!(output.written > 0);
        assert_eq!(codec.pending_samples(), (8 * 128 - 960) * 2);
    }

    #[test]
    fn test_unsupported_rate() {
        let mut config = session();
        config.sample_rate = 96_000;
        assert!(matches!(
            OpusBlockCodec::new(&config, &CodecConfig::default()),
            Err(CodecError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_loader_builds_configured_shape() {
        let mut loader = OpusLoader::new(CodecConfig {
            backend: CodecBackend::OpusStream,
            ..CodecConfig::default()
        });
        let factory = loader.load().unwrap();
        assert!(loader.is_loaded());

        let encoder = factory.create(&session()).unwrap();
        assert!(matches!(encoder, FrameEncoder::Stream { .. }));
        assert_eq!(encoder.samples_per_frame(), 960);

        loader.unload();
        assert!(!loader.is_loaded());
    }
}
