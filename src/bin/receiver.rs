//! Packetizer Receiver
//!
//! Listens for media packets, reassembles fragmented groups and reports
//! loss statistics.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use a2dp_packetizer::{
    config::AppConfig,
    constants::*,
    network::{create_socket, Reassembler},
    protocol::MediaPacket,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting packetizer receiver");

    let config = AppConfig::load_or_default()?;

    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("Invalid bind address: {}", arg))?,
        None => SocketAddr::from(([0, 0, 0, 0], config.network.target.port())),
    };

    let socket = tokio::net::UdpSocket::from_std(create_socket(bind_addr)?)?;
    tracing::info!("Listening on {}", socket.local_addr()?);

    let mut reassembler = Reassembler::new();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let mut stats_timer = tokio::time::interval(Duration::from_secs(5));
    let mut frames_received: u64 = 0;
    let mut bytes_received: u64 = 0;
    let mut last_timestamp: Option<u32> = None;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!("Receive failed: {}", e);
                        continue;
                    }
                };

                let packet = match MediaPacket::parse(Bytes::copy_from_slice(&buf[..len])) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::debug!("Ignoring datagram from {}: {}", from, e);
                        continue;
                    }
                };

                if let Some(frame) = reassembler.push(&packet) {
                    frames_received += frame.frames as u64;
                    bytes_received += frame.payload.len() as u64;
                    if let Some(last) = last_timestamp {
                        tracing::trace!(
                            timestamp = frame.timestamp,
                            delta = frame.timestamp.wrapping_sub(last),
                            packets = frame.packets,
                            "Group complete"
                        );
                    }
                    last_timestamp = Some(frame.timestamp);
                }
            }
            _ = stats_timer.tick() => {
                let stats = reassembler.stats();
                if stats.packets_received > 0 {
                    tracing::info!(
                        "Stats: {} packets, {} lost, {} groups ({} discarded), {} frames, {:.1} KB payload",
                        stats.packets_received,
                        stats.packets_lost,
                        stats.groups_completed,
                        stats.groups_discarded,
                        frames_received,
                        bytes_received as f64 / 1024.0
                    );
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
