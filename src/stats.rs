//! Encoder statistics

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Monotonic counters for one encoder session
///
/// Updated by the PCM reader and the packet assembler. Nothing in the
/// pipeline reads them back to make decisions.
#[derive(Debug, Clone, Serialize)]
pub struct EncoderStats {
    pub session_start: DateTime<Utc>,

    pub expected_packets: u64,
    pub dropped_packets: u64,
    pub emitted_packets: u64,

    pub expected_reads: u64,
    pub expected_read_bytes: u64,
    pub actual_reads: u64,
    pub actual_read_bytes: u64,

    pub underflows: u64,
    pub codec_failures: u64,
    pub backpressure_events: u64,
}

impl EncoderStats {
    pub fn new() -> Self {
        Self {
            session_start: Utc::now(),
            expected_packets: 0,
            dropped_packets: 0,
            emitted_packets: 0,
            expected_reads: 0,
            expected_read_bytes: 0,
            actual_reads: 0,
            actual_read_bytes: 0,
            underflows: 0,
            codec_failures: 0,
            backpressure_events: 0,
        }
    }

    /// Fraction of expected PCM bytes that the supplier delivered
    pub fn read_ratio(&self) -> f32 {
        if self.expected_read_bytes == 0 {
            1.0
        } else {
            self.actual_read_bytes as f32 / self.expected_read_bytes as f32
        }
    }
}

impl Default for EncoderStats {
    fn default() -> Self {
        Self::new()
    }
}
