//! Encoder session
//!
//! Owns everything one stream needs between ticks: the codec handle, the
//! pacing state, the media timestamp and the packet sequence counter. The
//! host drives it by calling [`EncoderSession::on_tick`] roughly every
//! [`TICK_INTERVAL_MS`] milliseconds.
//!
//! A tick is self-contained. It computes the frames due, assembles them
//! into packets, stamps the packets and hands them to the sink until the
//! sink pushes back. Errors are absorbed into the statistics and the
//! returned [`TickReport`]; nothing carries over to the next tick except
//! the pacing budget of frames that were never read.

use uuid::Uuid;

use crate::audio::{FeedingState, FramesDue, PcmReader, PcmSupply};
use crate::codec::{CodecFactory, CodecLoader, FrameEncoder};
use crate::config::{LatencyMode, SessionConfig};
use crate::constants::TICK_INTERVAL_MS;
use crate::error::{Result, TickError};
use crate::network::PacketSink;
use crate::packetizer::PacketAssembler;
use crate::stats::EncoderStats;

/// What a configuration change requires from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// PCM format changed; the audio input must be reopened
    pub restart_input: bool,
    /// The encoder was rebuilt; the output path must be restarted
    pub restart_output: bool,
    /// Any parameter changed
    pub config_updated: bool,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: FramesDue,
    /// PCM blocks read and encoded
    pub blocks_read: u32,
    pub frames_produced: u32,
    /// Packets built, whether or not the sink took them
    pub packets_built: usize,
    pub packets_emitted: usize,
    /// Emission stopped because the sink refused a packet
    pub backpressure: bool,
    pub error: Option<TickError>,
}

/// One encoder stream
pub struct EncoderSession<S, K> {
    id: Uuid,
    config: SessionConfig,
    factory: Box<dyn CodecFactory>,
    encoder: Option<FrameEncoder>,
    block_samples: u32,
    feeding: FeedingState,
    reader: PcmReader<S>,
    sink: K,
    assembler: PacketAssembler,
    /// Media timestamp of the next packet group, in samples
    timestamp: u32,
    /// Sequence number of the next emitted packet
    sequence: u8,
    tx_queue_length: usize,
    stats: EncoderStats,
}

impl<S: PcmSupply, K: PacketSink> EncoderSession<S, K> {
    /// Load the codec and open a session.
    pub fn new(
        config: SessionConfig,
        loader: &mut dyn CodecLoader,
        supply: S,
        sink: K,
    ) -> Result<Self> {
        let factory = loader.load()?;
        Self::with_factory(config, factory, supply, sink)
    }

    /// Open a session on an already loaded codec.
    pub fn with_factory(
        config: SessionConfig,
        factory: Box<dyn CodecFactory>,
        supply: S,
        sink: K,
    ) -> Result<Self> {
        config.validate()?;
        let encoder = factory.create(&config)?;
        let block_samples = encoder.block_samples();
        let id = Uuid::new_v4();

        tracing::info!(
            session = %id,
            codec = factory.name(),
            sample_rate = config.sample_rate,
            channels = config.channels,
            bits_per_sample = config.bits_per_sample,
            quality = config.quality_mode.name(),
            mtu = config.mtu(),
            "Encoder session opened"
        );

        Ok(Self {
            id,
            feeding: FeedingState::new(&config, block_samples),
            assembler: PacketAssembler::new(
                config.mtu(),
                config.pcm_bytes(block_samples) as usize,
            ),
            config,
            factory,
            encoder: Some(encoder),
            block_samples,
            reader: PcmReader::new(supply),
            sink,
            timestamp: 0,
            sequence: 0,
            tx_queue_length: 0,
            stats: EncoderStats::new(),
        })
    }

    /// Interval at which the host is expected to call [`Self::on_tick`]
    pub fn encoder_interval_ms(&self) -> u32 {
        TICK_INTERVAL_MS
    }

    /// Restart pacing, e.g. after the stream was suspended.
    pub fn feeding_reset(&mut self) {
        self.feeding.reset(&self.config, self.block_samples);
    }

    /// Discard any accumulated frame budget.
    pub fn feeding_flush(&mut self) {
        self.feeding.flush();
    }

    /// Record the host's current transmit queue depth.
    pub fn set_transmit_queue_length(&mut self, length: usize) {
        self.tx_queue_length = length;
    }

    /// Replace the session parameters.
    ///
    /// The encoder is rebuilt when the PCM format or quality mode changes.
    /// Pacing restarts and the media timestamp goes back to zero.
    pub fn update_config(&mut self, config: SessionConfig) -> Result<ConfigUpdate> {
        let _span = tracing::info_span!("session", id = %self.id).entered();

        config.validate()?;
        if config == self.config && self.encoder.is_some() {
            return Ok(ConfigUpdate::default());
        }

        let format_changed = config.sample_rate != self.config.sample_rate
            || config.channels != self.config.channels
            || config.bits_per_sample != self.config.bits_per_sample;
        let rebuild = format_changed
            || config.quality_mode != self.config.quality_mode
            || self.encoder.is_none();

        if rebuild {
            let encoder = self.factory.create(&config)?;
            self.block_samples = encoder.block_samples();
            self.encoder = Some(encoder);
        }

        tracing::info!(
            sample_rate = config.sample_rate,
            quality = config.quality_mode.name(),
            mtu = config.mtu(),
            rebuild,
            "Session config updated"
        );

        self.assembler = PacketAssembler::new(
            config.mtu(),
            config.pcm_bytes(self.block_samples) as usize,
        );
        self.config = config;
        self.timestamp = 0;
        self.feeding_reset();

        Ok(ConfigUpdate {
            restart_input: format_changed,
            restart_output: rebuild,
            config_updated: true,
        })
    }

    /// Release the codec handle. Later ticks fail with
    /// [`TickError::InvalidHandle`] until the config is updated.
    pub fn cleanup(&mut self) {
        if self.encoder.take().is_some() {
            tracing::info!(session = %self.id, "Encoder session closed");
        }
    }

    /// Run one tick at time `now_us` (microseconds, monotonic).
    pub fn on_tick(&mut self, now_us: u64) -> TickReport {
        let _span = tracing::info_span!("session", id = %self.id).entered();

        let due = self.feeding.compute_frames_due(now_us);
        let mut report = TickReport {
            due,
            ..TickReport::default()
        };

        for _ in 0..due.iterations {
            if due.frames == 0 {
                break;
            }
            let stop = self.run_pass(due.frames, &mut report);
            if stop {
                break;
            }
        }
        report
    }

    /// One assemble-and-emit pass. Returns true when the tick must end.
    fn run_pass(&mut self, frames: u32, report: &mut TickReport) -> bool {
        let samples_per_frame = self
            .encoder
            .as_ref()
            .map_or(self.block_samples, FrameEncoder::samples_per_frame);

        let batch = self.assembler.assemble(
            frames,
            &mut self.reader,
            self.encoder.as_mut(),
            &mut self.stats,
        );
        report.blocks_read += batch.blocks_read;
        report.frames_produced += batch.frames_produced;

        let stamp = self.timestamp;
        self.timestamp = self
            .timestamp
            .wrapping_add(batch.frames_produced.wrapping_mul(samples_per_frame));

        match &batch.outcome {
            Ok(()) => {}
            Err(TickError::Underflow { frames_left }) => {
                self.feeding.restore_frames(*frames_left);
                self.stats.underflows += 1;
                tracing::debug!(frames_left, "PCM underflow");
            }
            Err(e) => {
                if matches!(e, TickError::CodecFailure(_) | TickError::InvalidHandle) {
                    self.stats.codec_failures += 1;
                }
                self.stats.dropped_packets += batch.discarded.max(1) as u64;
                tracing::warn!("Tick aborted: {}", e);
                report.error = Some(e.clone());
                return true;
            }
        }

        let underflow = batch.outcome.clone().err();
        report.packets_built += batch.len();

        let low_latency = self.config.latency_mode == LatencyMode::Low;
        for (packet, frames) in batch.into_packets(self.sequence, stamp, low_latency) {
            if !self.sink.enqueue(packet, frames) {
                self.stats.backpressure_events += 1;
                report.backpressure = true;
                tracing::debug!(
                    emitted = report.packets_emitted,
                    queue = self.tx_queue_length,
                    "Sink refused packet"
                );
                break;
            }
            self.sequence = self.sequence.wrapping_add(1);
            self.stats.emitted_packets += 1;
            report.packets_emitted += 1;
        }

        if underflow.is_some() {
            report.error = underflow;
        }
        report.backpressure || report.error.is_some()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    pub fn feeding(&self) -> &FeedingState {
        &self.feeding
    }

    /// Media timestamp the next packet group will carry
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Sequence number of the next emitted packet
    pub fn next_sequence(&self) -> u8 {
        self.sequence
    }

    pub fn transmit_queue_length(&self) -> usize {
        self.tx_queue_length
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn supply_mut(&mut self) -> &mut S {
        self.reader.supply_mut()
    }
}
