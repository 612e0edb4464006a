//! Packetizer Sender
//!
//! Paces a generated test tone through an encoder session and streams the
//! resulting media packets to a receiver over UDP.

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use std::f32::consts::TAU;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use a2dp_packetizer::{
    audio::{create_shared_ring, PcmRingReader, SharedPcmRing},
    codec::OpusLoader,
    config::{AppConfig, SessionConfig},
    constants::*,
    network::{transmit_queue, TxQueueReceiver, UdpSink},
    EncoderSession,
};

/// Tone generator chunk length
const CHUNK_MS: u32 = 10;

/// Interval between statistics reports
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Sine generator producing interleaved little-endian PCM
struct ToneGenerator {
    phase: f32,
    step: f32,
    channels: usize,
    bits_per_sample: u8,
}

impl ToneGenerator {
    fn new(config: &SessionConfig, frequency: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / config.sample_rate as f32,
            channels: config.channels as usize,
            bits_per_sample: config.bits_per_sample,
        }
    }

    fn chunk(&mut self, samples: usize) -> BytesMut {
        let width = self.bits_per_sample as usize / 8;
        let mut buf = BytesMut::with_capacity(samples * self.channels * width);
        for _ in 0..samples {
            let value = self.phase.sin() * 0.25;
            self.phase = (self.phase + self.step) % TAU;
            for _ in 0..self.channels {
                match self.bits_per_sample {
                    24 => {
                        let sample = (value * 8_388_607.0) as i32;
                        buf.put_slice(&sample.to_le_bytes()[..3]);
                    }
                    _ => buf.put_i16_le((value * i16::MAX as f32) as i16),
                }
            }
        }
        buf
    }
}

/// Keep the PCM ring topped up at real-time rate
async fn run_tone(ring: SharedPcmRing, config: SessionConfig) {
    let mut tone = ToneGenerator::new(&config, 440.0);
    let samples = (config.sample_rate * CHUNK_MS / 1000) as usize;
    let mut interval = tokio::time::interval(Duration::from_millis(CHUNK_MS as u64));

    loop {
        interval.tick().await;
        if !ring.push(tone.chunk(samples).freeze()) {
            tracing::trace!("PCM ring full");
        }
    }
}

/// Drain the transmit queue onto the socket
fn run_transmitter(queue: TxQueueReceiver, mut sink: UdpSink) {
    use a2dp_packetizer::network::PacketSink;

    loop {
        match queue.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(packet)) => {
                let frames = u32::from(packet.header().frames);
                if !sink.enqueue(packet, frames) {
                    tracing::debug!("Socket busy, packet dropped");
                }
            }
            Ok(None) => {}
            Err(_) => break,
        }
    }

    tracing::info!(
        "Transmitter stopped: {} packets, {:.1} KB sent, {} errors",
        sink.packets_sent(),
        sink.bytes_sent() as f64 / 1024.0,
        sink.send_errors()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting packetizer sender");

    let mut config = AppConfig::load_or_default()?;

    // Target address from args overrides the config file
    if let Some(arg) = std::env::args().nth(1) {
        config.network.target = arg
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid target address: {}", arg))?;
    }
    tracing::info!("Target receiver: {}", config.network.target);

    let udp = UdpSink::bind(config.network.bind_address, config.network.target)?;
    let (tx_queue, tx_rx) = transmit_queue(config.network.queue_depth);
    let transmitter = std::thread::Builder::new()
        .name("transmitter".into())
        .spawn(move || run_transmitter(tx_rx, udp))?;

    let ring = create_shared_ring(RING_BUFFER_CAPACITY);
    let tone = tokio::spawn(run_tone(ring.clone(), config.session.clone()));

    let mut loader = OpusLoader::new(config.codec.clone());
    let mut session = EncoderSession::new(
        config.session.clone(),
        &mut loader,
        PcmRingReader::new(ring.clone()),
        tx_queue,
    )?;

    tracing::info!(
        "Session {} ready: {} Hz, {} ch, {} bit, MTU {}",
        session.id(),
        config.session.sample_rate,
        config.session.channels,
        config.session.bits_per_sample,
        config.session.mtu()
    );

    let start = Instant::now();
    let mut ticker =
        tokio::time::interval(Duration::from_millis(session.encoder_interval_ms() as u64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_stats = Instant::now();

    tracing::info!("Streaming - press Ctrl+C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let queued = session.sink().len();
                session.set_transmit_queue_length(queued);

                let report = session.on_tick(start.elapsed().as_micros() as u64);
                if let Some(e) = &report.error {
                    tracing::debug!("Tick ended early: {}", e);
                }

                if last_stats.elapsed() >= STATS_INTERVAL {
                    last_stats = Instant::now();
                    let stats = session.stats();
                    tracing::info!(
                        "Stats: {} packets emitted, {} dropped, read ratio {:.3}, ring fill {:.0}%",
                        stats.emitted_packets,
                        stats.dropped_packets,
                        stats.read_ratio(),
                        ring.fill_level() * 100.0
                    );
                    tracing::debug!("{}", serde_json::to_string(stats)?);
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    tone.abort();
    session.cleanup();
    let stats = serde_json::to_string_pretty(session.stats())?;
    drop(session);

    if transmitter.join().is_err() {
        tracing::warn!("Transmitter thread panicked");
    }
    println!("{}", stats);

    Ok(())
}
