// src/export/sink.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::engine::BusSink;

/// Master-bus tap feeding the export encoder through a lock-free ring.
pub struct BusCapture {
    producer: HeapProd<f32>,
    written: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

/// Encoder side of a `BusCapture`.
pub struct CaptureTap {
    pub consumer: HeapCons<f32>,
    written: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl BusCapture {
    pub fn new(capacity_samples: usize) -> (Self, CaptureTap) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity_samples.max(1)).split();
        let written = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                producer,
                written: written.clone(),
                dropped: dropped.clone(),
            },
            CaptureTap {
                consumer,
                written,
                dropped,
            },
        )
    }
}

impl BusSink for BusCapture {
    fn write(&mut self, block: &[f32], channels: usize) {
        // Whole frames only, so the encoder never sees a split frame.
        let channels = channels.max(1);
        let room = self.producer.vacant_len().min(block.len());
        let pushed = self.producer.push_slice(&block[..room - room % channels]);
        self.written.fetch_add(pushed as u64, Ordering::Relaxed);
        if pushed < block.len() {
            self.dropped
                .fetch_add((block.len() - pushed) as u64, Ordering::Relaxed);
        }
    }
}

impl CaptureTap {
    /// Samples the bus handed to this capture so far.
    pub fn samples_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Samples lost because the encoder fell behind.
    pub fn samples_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    #[test]
    fn overflow_keeps_frames_whole() {
        let (mut sink, mut tap) = BusCapture::new(5);
        sink.write(&[1.0, -1.0, 2.0, -2.0], 2);
        // One slot left: the next stereo frame does not fit and is dropped whole.
        sink.write(&[3.0, -3.0], 2);
        assert_eq!(tap.samples_written(), 4);
        assert_eq!(tap.samples_dropped(), 2);

        let mut out = [0.0; 8];
        assert_eq!(tap.consumer.pop_slice(&mut out), 4);
        sink.write(&[4.0, -4.0, 5.0, -5.0], 2);
        assert_eq!(tap.consumer.pop_slice(&mut out), 4);
        assert_eq!(&out[..4], &[4.0, -4.0, 5.0, -5.0]);
    }

    #[test]
    fn overflow_is_counted_not_blocking() {
        let (mut sink, mut tap) = BusCapture::new(4);
        sink.write(&[1.0, 2.0, 3.0], 1);
        sink.write(&[4.0, 5.0, 6.0], 1);
        assert_eq!(tap.samples_written(), 4);
        assert_eq!(tap.samples_dropped(), 2);
        let mut out = [0.0; 8];
        assert_eq!(tap.consumer.pop_slice(&mut out), 4);
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 4.0]);
    }
}
