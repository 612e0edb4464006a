//! Lock-free PCM ring
//!
//! A single-producer single-consumer queue of interleaved PCM chunks. The
//! producer (capture thread, file reader, tone generator) pushes whole
//! chunks; the encoder side drains them at whatever block size the codec
//! asks for through [`PcmRingReader`].

use bytes::{Buf, Bytes};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::source::PcmSupply;

/// Lock-free ring of PCM chunks
pub struct PcmRing {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl PcmRing {
    /// Create a new ring holding at most `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a chunk into the ring
    /// Returns false if the ring is full (overflow)
    pub fn push(&self, chunk: Bytes) -> bool {
        match self.queue.push(chunk) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a PCM ring
pub type SharedPcmRing = Arc<PcmRing>;

/// Create a new shared PCM ring
pub fn create_shared_ring(capacity: usize) -> SharedPcmRing {
    Arc::new(PcmRing::new(capacity))
}

/// Consumer half of a [`PcmRing`]
///
/// Keeps the unread tail of the last popped chunk so reads can cut across
/// chunk boundaries.
pub struct PcmRingReader {
    ring: SharedPcmRing,
    pending: Bytes,
}

impl PcmRingReader {
    pub fn new(ring: SharedPcmRing) -> Self {
        Self {
            ring,
            pending: Bytes::new(),
        }
    }

    pub fn ring(&self) -> &SharedPcmRing {
        &self.ring
    }

    /// Bytes immediately available without waiting on the producer
    pub fn buffered_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Drop everything queued, including the partial chunk.
    pub fn clear(&mut self) {
        self.pending.clear();
        while self.ring.pop().is_some() {}
    }
}

impl PcmSupply for PcmRingReader {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending.is_empty() {
                match self.ring.pop() {
                    Some(chunk) => self.pending = chunk,
                    None => break,
                }
            }
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            filled += n;
        }
        if filled < buf.len() {
            self.ring.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        filled
    }
}
