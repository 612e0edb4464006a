//! Bounded transmit queue
//!
//! Decouples the tick thread from the thread that owns the socket. A full
//! queue is the backpressure signal for the packet assembler.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

use crate::error::TransportError;
use crate::network::PacketSink;
use crate::protocol::MediaPacket;

/// Producer half, used as the session's sink
#[derive(Clone)]
pub struct TxQueue {
    tx: Sender<MediaPacket>,
    rejected: u64,
}

/// Consumer half, drained by the sending thread
pub struct TxQueueReceiver {
    rx: Receiver<MediaPacket>,
}

/// Create a transmit queue holding at most `depth` packets
pub fn transmit_queue(depth: usize) -> (TxQueue, TxQueueReceiver) {
    let (tx, rx) = bounded(depth);
    (TxQueue { tx, rejected: 0 }, TxQueueReceiver { rx })
}

impl TxQueue {
    /// Packets waiting to be sent
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Packets refused because the queue was full or closed
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl PacketSink for TxQueue {
    fn enqueue(&mut self, packet: MediaPacket, _frames: u32) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.rejected += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("Transmit queue receiver is gone");
                self.rejected += 1;
                false
            }
        }
    }
}

impl TxQueueReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<MediaPacket>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Option<MediaPacket> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
