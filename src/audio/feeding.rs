//! Rate accumulator
//!
//! Converts wall-clock time between ticks into a whole number of codec
//! frames. The budget earned per call is proportional to the real elapsed
//! time, so early and late wakeups average out instead of drifting.

use crate::config::SessionConfig;
use crate::constants::TICK_INTERVAL_MS;

/// Frames due for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramesDue {
    /// Frames to encode in each iteration
    pub frames: u32,
    /// Encode passes to run
    pub iterations: u32,
}

/// Pacing state of one session
#[derive(Debug, Clone, Default)]
pub struct FeedingState {
    /// PCM bytes earned but not yet turned into frames
    counter: u64,
    bytes_per_tick: u64,
    bytes_per_frame: u64,
    /// Timestamp of the previous tick, `None` right after a reset
    last_tick_us: Option<u64>,
}

impl FeedingState {
    pub fn new(config: &SessionConfig, block_samples: u32) -> Self {
        let mut state = Self::default();
        state.reset(config, block_samples);
        state
    }

    /// Clear all state and recompute the per-tick and per-frame budgets.
    pub fn reset(&mut self, config: &SessionConfig, block_samples: u32) {
        self.counter = 0;
        self.last_tick_us = None;
        self.bytes_per_tick = bytes_per_tick(config);
        self.bytes_per_frame = config.pcm_bytes(block_samples) as u64;

        tracing::debug!(
            bytes_per_tick = self.bytes_per_tick,
            bytes_per_frame = self.bytes_per_frame,
            "Feeding reset"
        );
    }

    /// Drop any accumulated budget, keeping the tick timing.
    pub fn flush(&mut self) {
        self.counter = 0;
    }

    /// Account for the time since the previous tick and return the frames
    /// that are now due.
    pub fn compute_frames_due(&mut self, now_us: u64) -> FramesDue {
        let interval_us = TICK_INTERVAL_MS as u64 * 1000;
        let elapsed_us = match self.last_tick_us {
            // A clock that steps backwards earns nothing.
            Some(last) => now_us.saturating_sub(last),
            None => interval_us,
        };
        self.last_tick_us = Some(now_us);

        self.counter += self.bytes_per_tick * elapsed_us / interval_us;

        let frames = if self.bytes_per_frame == 0 {
            0
        } else {
            self.counter / self.bytes_per_frame
        };
        self.counter -= frames * self.bytes_per_frame;

        let due = FramesDue {
            frames: u32::try_from(frames).unwrap_or(u32::MAX),
            iterations: 1,
        };
        tracing::trace!(
            elapsed_us,
            frames = due.frames,
            counter = self.counter,
            "Frames due"
        );
        due
    }

    /// Give back the budget of frames that could not be produced so they
    /// are retried on a later tick.
    pub fn restore_frames(&mut self, frames: u32) {
        self.counter += frames as u64 * self.bytes_per_frame;
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn bytes_per_tick(&self) -> u64 {
        self.bytes_per_tick
    }

    pub fn bytes_per_frame(&self) -> u64 {
        self.bytes_per_frame
    }

    pub fn last_tick_us(&self) -> Option<u64> {
        self.last_tick_us
    }
}

/// PCM bytes consumed by one nominal tick
pub fn bytes_per_tick(config: &SessionConfig) -> u64 {
    config.sample_rate as u64
        * config.bytes_per_sample() as u64
        * config.channels as u64
        * TICK_INTERVAL_MS as u64
        / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(sample_rate: u32, bits_per_sample: u8, channels: u8) -> SessionConfig {
        SessionConfig {
            sample_rate,
            bits_per_sample,
            channels,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_bytes_per_tick_hi_res() {
        assert_eq!(bytes_per_tick(&config(96_000, 24, 2)), 11_520);
        assert_eq!(bytes_per_tick(&config(44_100, 16, 2)), 3_528);
    }

    #[test]
    fn test_first_tick_is_nominal() {
        // 96 kHz / 24 bit / stereo with 128-sample blocks: 768 bytes per frame
        let mut state = FeedingState::new(&config(96_000, 24, 2), 128);
        assert_eq!(state.bytes_per_frame(), 768);

        let due = state.compute_frames_due(5_000_000);
        assert_eq!(due, FramesDue { frames: 15, iterations: 1 });
        assert_eq!(state.counter(), 0);
        assert_eq!(state.last_tick_us(), Some(5_000_000));
    }

    #[test]
    fn test_fractional_budget_carries_over() {
        // 44.1 kHz / 16 bit / stereo: 3528 bytes per tick, 512 per frame
        let mut state = FeedingState::new(&config(44_100, 16, 2), 128);
        let due = state.compute_frames_due(1_000);
        assert_eq!(due.frames, 6);
        assert_eq!(state.counter(), 3_528 - 6 * 512);

        let due = state.compute_frames_due(21_000);
        assert_eq!(due.frames, 7);
        assert_eq!(state.counter(), 2 * 3_528 - 13 * 512);
    }

    #[test]
    fn test_late_tick_earns_more() {
        let mut state = FeedingState::new(&config(48_000, 16, 2), 128);
        state.compute_frames_due(0);
        // A 40 ms gap is worth two nominal ticks.
        let due = state.compute_frames_due(40_000);
        assert_eq!(due.frames as u64 * 512 + state.counter(), 2 * 3_840 + 3_840 % 512);
    }

    #[test]
    fn test_backwards_clock_earns_nothing() {
        let mut state = FeedingState::new(&config(48_000, 16, 2), 128);
        state.compute_frames_due(100_000);
        let counter = state.counter();
        let due = state.compute_frames_due(50_000);
        assert_eq!(due.frames, 0);
        assert_eq!(state.counter(), counter);
    }

    #[test]
    fn test_restore_and_flush() {
        let mut state = FeedingState::new(&config(48_000, 16, 2), 128);
        state.restore_frames(3);
        assert_eq!(state.counter(), 3 * 512);
        state.flush();
        assert_eq!(state.counter(), 0);
    }

    #[test]
    fn test_reset_forgets_last_tick() {
        let cfg = config(48_000, 16, 2);
        let mut state = FeedingState::new(&cfg, 128);
        state.compute_frames_due(10_000);
        state.reset(&cfg, 128);
        assert_eq!(state.last_tick_us(), None);
        assert_eq!(state.counter(), 0);
    }

    proptest! {
        #[test]
        fn prop_budget_is_conserved(
            rate in prop::sample::select(vec![44_100u32, 48_000, 88_200, 96_000]),
            bits in prop::sample::select(vec![16u8, 24]),
            channels in 1u8..=2,
            block in prop::sample::select(vec![128u32, 256, 480, 512]),
            start in 1u64..1_000_000,
            gaps in prop::collection::vec(0u64..100_000, 1..64),
        ) {
            let cfg = config(rate, bits, channels);
            let mut state = FeedingState::new(&cfg, block);
            let per_tick = bytes_per_tick(&cfg);
            let interval_us = TICK_INTERVAL_MS as u64 * 1000;

            let mut now = start;
            let mut earned = per_tick; // first call is nominal
            let mut spent = state.compute_frames_due(now).frames as u64 * state.bytes_per_frame();
            prop_assert!(state.counter() < state.bytes_per_frame());

            for gap in gaps {
                now += gap;
                earned += per_tick * gap / interval_us;
                spent += state.compute_frames_due(now).frames as u64 * state.bytes_per_frame();
                prop_assert!(state.counter() < state.bytes_per_frame());
            }

            prop_assert_eq!(spent + state.counter(), earned);
        }
    }
}
