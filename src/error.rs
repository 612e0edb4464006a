//! Error types for the pacing and packetization pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tick error: {0}")]
    Tick(#[from] TickError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that end the current tick early.
///
/// None of these are carried past the tick that produced them; the next
/// tick starts from a clean assembler state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickError {
    /// The PCM supplier returned no bytes for a requested block.
    #[error("PCM underflow with {frames_left} frame(s) still due")]
    Underflow { frames_left: u32 },

    #[error("Codec failure: {0}")]
    CodecFailure(String),

    /// Encoding was attempted without a live codec handle.
    #[error("No valid codec handle")]
    InvalidHandle,

    #[error("Packet buffer allocation failed ({0} bytes)")]
    AllocationFailure(usize),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid block size: {0} bytes")]
    InvalidBlockSize(usize),

    #[error("Output buffer too small: need {needed}, have {available}")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Codec library not loaded")]
    NotLoaded,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Unsupported bits per sample: {0}")]
    UnsupportedBitsPerSample(u8),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u8),

    #[error("Invalid peer MTU: {0}")]
    InvalidMtu(u16),

    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("Transmit queue disconnected")]
    Disconnected,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
