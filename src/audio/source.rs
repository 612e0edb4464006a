//! PCM source adapter
//!
//! Pulls one codec input block at a time from an external supplier. Short
//! reads are padded with silence so a momentary underrun does not tear the
//! stream; only a read that returns nothing at all is reported.

use crate::error::TickError;
use crate::stats::EncoderStats;

/// External PCM supplier
///
/// `read` fills as much of `buf` as it can and returns the number of bytes
/// written. It must not block.
pub trait PcmSupply {
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

impl<F> PcmSupply for F
where
    F: FnMut(&mut [u8]) -> usize,
{
    fn read(&mut self, buf: &mut [u8]) -> usize {
        self(buf)
    }
}

/// Reads fixed-size PCM blocks from a [`PcmSupply`]
pub struct PcmReader<S> {
    supply: S,
}

impl<S: PcmSupply> PcmReader<S> {
    pub fn new(supply: S) -> Self {
        Self { supply }
    }

    /// Fill `block` completely.
    ///
    /// Returns the number of bytes the supplier actually delivered; anything
    /// past that is zeroed. Fails with [`TickError::Underflow`] when the
    /// supplier delivered nothing.
    pub fn read_block(
        &mut self,
        block: &mut [u8],
        stats: &mut EncoderStats,
    ) -> Result<usize, TickError> {
        let wanted = block.len();
        stats.expected_reads += 1;
        stats.expected_read_bytes += wanted as u64;

        let read = self.supply.read(block).min(wanted);
        if read == 0 {
            return Err(TickError::Underflow { frames_left: 0 });
        }
        if read < wanted {
            tracing::trace!(read, wanted, "Short PCM read, padding with silence");
            block[read..].fill(0);
        }

        stats.actual_reads += 1;
        stats.actual_read_bytes += read as u64;
        Ok(read)
    }

    pub fn supply(&self) -> &S {
        &self.supply
    }

    pub fn supply_mut(&mut self) -> &mut S {
        &mut self.supply
    }

    pub fn into_inner(self) -> S {
        self.supply
    }
}
