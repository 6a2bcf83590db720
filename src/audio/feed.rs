//! Lock-free live feed for progressively generated audio
//!
//! A [`FeedWriter`] pushes PCM bytes from any producer thread into a
//! single-producer/single-consumer ring (`ringbuf`). The matching
//! [`FeedGenerator`] is installed as a buffer's generator hook and moves
//! whole samples from the ring into the payload when the render thread runs
//! short. Neither side ever waits for the other: a full ring drops the
//! overflow and an empty ring makes the buffer underrun.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

use super::buffer::{PcmGenerator, StreamingBuffer};
use super::pcm::PcmFormat;
use crate::settings::StreamSettings;

/// Producer half of a live feed
pub struct FeedWriter {
    producer: ringbuf::HeapProd<u8>,
    bytes_written: Arc<AtomicU64>,
    bytes_dropped: u64,
}

impl FeedWriter {
    /// Push as many bytes as fit and return how many were accepted.
    ///
    /// This never blocks. Bytes that do not fit are dropped and counted.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let pushed = self.producer.push_slice(data);
        self.bytes_written.fetch_add(pushed as u64, Ordering::Relaxed);

        let dropped = data.len() - pushed;
        if dropped > 0 {
            self.bytes_dropped += dropped as u64;
            log::warn!("Live feed full, dropped {} bytes", dropped);
        }
        pushed
    }

    /// Free space in bytes
    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Total bytes rejected because the ring was full
    pub fn dropped_bytes(&self) -> u64 {
        self.bytes_dropped
    }
}

/// Consumer half of a live feed, used as a [`PcmGenerator`]
pub struct FeedGenerator {
    consumer: ringbuf::HeapCons<u8>,
    bytes_written: Arc<AtomicU64>,
}

impl FeedGenerator {
    /// Bytes waiting in the ring
    pub fn queued(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Total bytes ever accepted by the writer
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl PcmGenerator for FeedGenerator {
    fn generate(&mut self, payload: &mut Vec<u8>, samples: usize, format: PcmFormat) -> usize {
        let width = format.byte_width();
        // A writer may have pushed half a sample; leave it for next time
        let take = (self.consumer.occupied_len() / width).min(samples);
        if take == 0 {
            return 0;
        }

        let start = payload.len();
        payload.resize(start + take * width, 0);
        let popped = self.consumer.pop_slice(&mut payload[start..]);
        debug_assert_eq!(popped, take * width);
        take
    }
}

/// Create a live feed holding up to `capacity` bytes
pub fn live_feed(capacity: usize) -> (FeedWriter, FeedGenerator) {
    let rb = HeapRb::<u8>::new(capacity.max(1));
    let (prod, cons) = rb.split();
    let bytes_written = Arc::new(AtomicU64::new(0));

    (
        FeedWriter {
            producer: prod,
            bytes_written: Arc::clone(&bytes_written),
            bytes_dropped: 0,
        },
        FeedGenerator {
            consumer: cons,
            bytes_written,
        },
    )
}

/// Create a buffer topped up from a new live feed of
/// `settings.live_feed_capacity` bytes. The writer goes to the producer.
pub fn live_buffer(format: PcmFormat, settings: &StreamSettings) -> (FeedWriter, StreamingBuffer) {
    let settings = settings.sanitized();
    let (writer, generator) = live_feed(settings.live_feed_capacity);
    log::debug!(
        "Created live buffer ({:?}, {} byte feed)",
        format,
        settings.live_feed_capacity
    );
    (writer, StreamingBuffer::with_generator(format, &settings, generator))
}
