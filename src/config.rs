//! Configuration for encoder sessions and the demo binaries
//!
//! Everything is (de)serialized with serde and stored as TOML. The
//! [`SessionConfig`] section is the read-only parameter snapshot an
//! [`EncoderSession`](crate::session::EncoderSession) works from; it is
//! replaced as a whole through `update_config`, never mutated in place.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::HEADER_LEN;

/// Encoder quality mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    High,
    #[default]
    Mid,
    Low,
}

impl QualityMode {
    /// Map a quality mode index. Unknown indices, including 3 (adaptive
    /// bitrate, which has no backend here), fall back to [`QualityMode::Mid`].
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::High,
            1 => Self::Mid,
            2 => Self::Low,
            3 => {
                tracing::warn!("Adaptive bitrate is not available, using quality mode MID");
                Self::Mid
            }
            other => {
                tracing::warn!("Unknown quality mode index {}, using MID", other);
                Self::Mid
            }
        }
    }

    /// Derive the mode from a codec-specific configuration value, where the
    /// last decimal digit carries the quality index and zero means "unset".
    pub fn from_codec_specific(value: u64) -> Self {
        if value == 0 {
            Self::default()
        } else {
            Self::from_index((value % 10) as u8)
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Mid => 1,
            Self::Low => 2,
        }
    }

    /// Nominal transmission bitrate in kbit/s
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            Self::High => 990,
            Self::Mid => 660,
            Self::Low => 330,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Mid => "MID",
            Self::Low => "LOW",
        }
    }
}

/// Encoder latency mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    Low,
    #[default]
    Mid,
    High,
}

impl LatencyMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Low,
            2 => Self::High,
            _ => Self::Mid,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Mid => 1,
            Self::High => 2,
        }
    }
}

/// Sample rates a session accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [44_100, 48_000, 88_200, 96_000];

/// Over-the-air sampling frequency code for a sample rate.
///
/// The frequency field is three bits wide, so 88.2 kHz has no code even
/// though sessions accept it.
pub fn sample_rate_code(sample_rate: u32) -> Option<u8> {
    match sample_rate {
        44_100 => Some(0x04),
        48_000 => Some(0x02),
        96_000 => Some(0x01),
        _ => None,
    }
}

/// Sample rate for an over-the-air sampling frequency code
pub fn sample_rate_from_code(code: u8) -> Option<u32> {
    match code {
        0x04 => Some(44_100),
        0x02 => Some(48_000),
        0x01 => Some(96_000),
        _ => None,
    }
}

/// Per-session stream parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub quality_mode: QualityMode,
    pub latency_mode: LatencyMode,
    /// MTU announced by the peer, before clamping to the local buffer size
    pub peer_mtu: u16,
}

impl SessionConfig {
    pub fn bytes_per_sample(&self) -> u32 {
        self.bits_per_sample as u32 / 8
    }

    /// Bytes of interleaved PCM for `samples` samples per channel
    pub fn pcm_bytes(&self, samples: u32) -> u32 {
        samples * self.channels as u32 * self.bytes_per_sample()
    }

    /// MTU actually used for packets: the peer MTU, capped by the local
    /// transmit buffer.
    pub fn mtu(&self) -> usize {
        (self.peer_mtu as usize).min(MAX_BUFFER_MTU)
    }

    /// Largest payload a single packet can carry
    pub fn max_payload(&self) -> usize {
        self.mtu().saturating_sub(HEADER_LEN)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::UnsupportedSampleRate(self.sample_rate));
        }
        if !matches!(self.bits_per_sample, 16 | 24) {
            return Err(ConfigError::UnsupportedBitsPerSample(self.bits_per_sample));
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(ConfigError::UnsupportedChannels(self.channels));
        }
        if self.mtu() <= HEADER_LEN {
            return Err(ConfigError::InvalidMtu(self.peer_mtu));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            quality_mode: QualityMode::default(),
            latency_mode: LatencyMode::default(),
            peer_mtu: DEFAULT_PEER_MTU,
        }
    }
}

/// Which codec call shape the loader should build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecBackend {
    /// One fixed-size output per PCM block
    #[default]
    OpusBlock,
    /// Buffers blocks internally, reports frames produced per call
    OpusStream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub backend: CodecBackend,
    /// Overrides the quality-mode bitrate when set (bits per second)
    pub bitrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub target: SocketAddr,
    pub bind_address: SocketAddr,
    /// Packets the transmit queue holds before reporting backpressure
    pub queue_depth: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)),
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            queue_depth: DEFAULT_TX_QUEUE_DEPTH,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub codec: CodecConfig,
    pub network: NetworkConfig,
}

impl AppConfig {
    pub const FILE_NAME: &'static str = "config.toml";

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the platform config directory, or fall back to defaults
    /// when no file exists there.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "a2dp-packetizer", "a2dp-packetizer")
            .map(|dirs| dirs.config_dir().join(Self::FILE_NAME))
    }
}
