//! Streaming PCM buffer shared between a producer and the render thread
//!
//! A producer appends PCM bytes in bulk (once for a decoded file, or
//! repeatedly for live sources). The render callback pulls fixed-size chunks
//! and must never block for longer than a memory copy, and must never be left
//! without data: when not enough audio is available it receives silence.
//!
//! ## Sharing
//!
//! The payload lives behind an `Arc` and is shared by every handle created
//! with [`StreamingBuffer::shallow_copy`]. Each handle owns its own read
//! cursor, so several sound instances can play the same audio independently.
//! The payload is released when the last handle is dropped.
//!
//! ## Retention
//!
//! Consumed bytes are retained; pulling only advances the cursor. Any
//! position can be sought back to at the cost of the payload growing with
//! everything ever appended. Live sources that need bounded memory keep their
//! backlog in a [`live_feed`](super::live_feed) ring and let the generator hook top
//! the payload up on demand.
//!
//! ## Locking
//!
//! - payload: `RwLock`, write-locked only by `append` and the generator hook
//! - cursor: per-handle `Mutex`, held for the duration of a pull or seek
//!
//! Locks are always taken cursor first, payload second.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::pcm::{PcmFormat, StreamDescriptor};
use crate::settings::StreamSettings;

/// Strategy invoked from the pull path when the payload runs low.
///
/// Runs on the render thread with the payload write-locked, so it should do
/// no more than copy already prepared samples.
pub trait PcmGenerator: Send {
    /// Append up to `samples` samples of `format` to `payload` and return how
    /// many were appended.
    fn generate(&mut self, payload: &mut Vec<u8>, samples: usize, format: PcmFormat) -> usize;
}

impl<F> PcmGenerator for F
where
    F: FnMut(&mut Vec<u8>, usize, PcmFormat) -> usize + Send,
{
    fn generate(&mut self, payload: &mut Vec<u8>, samples: usize, format: PcmFormat) -> usize {
        self(payload, samples, format)
    }
}

/// State shared by all handles of one buffer
struct Shared {
    payload: RwLock<Vec<u8>>,
    generator: Option<Mutex<Box<dyn PcmGenerator>>>,
    /// No more data will be appended
    finished: AtomicBool,
}

/// Thread-safe streaming PCM buffer handle
pub struct StreamingBuffer {
    shared: Arc<Shared>,
    /// Read position in samples
    cursor: Mutex<usize>,
    format: PcmFormat,
    descriptor: Option<StreamDescriptor>,
    underrun_samples: usize,
    generate_ceiling: usize,
    underruns: AtomicU64,
}

impl StreamingBuffer {
    /// Create an empty buffer
    pub fn new(format: PcmFormat, settings: &StreamSettings) -> Self {
        Self::build(format, settings, None)
    }

    /// Create an empty buffer that asks `generator` for more audio whenever a
    /// pull finds too little
    pub fn with_generator(
        format: PcmFormat,
        settings: &StreamSettings,
        generator: impl PcmGenerator + 'static,
    ) -> Self {
        Self::build(format, settings, Some(Box::new(generator)))
    }

    fn build(
        format: PcmFormat,
        settings: &StreamSettings,
        generator: Option<Box<dyn PcmGenerator>>,
    ) -> Self {
        let settings = settings.sanitized();
        Self {
            shared: Arc::new(Shared {
                payload: RwLock::new(Vec::new()),
                generator: generator.map(Mutex::new),
                finished: AtomicBool::new(false),
            }),
            cursor: Mutex::new(0),
            format,
            descriptor: None,
            underrun_samples: settings.underrun_samples,
            generate_ceiling: settings.generate_ceiling,
            underruns: AtomicU64::new(0),
        }
    }

    /// Append PCM bytes (producer side).
    ///
    /// Empty input or a length that is not a whole number of samples is
    /// ignored.
    pub fn append(&self, data: &[u8]) {
        let width = self.format.byte_width();
        if data.is_empty() || data.len() % width != 0 {
            log::warn!(
                "Ignoring append of {} bytes (sample width {})",
                data.len(),
                width
            );
            return;
        }

        self.shared.payload.write().extend_from_slice(data);
    }

    /// Fill `out` from the cursor (render side) and return the number of
    /// bytes written.
    ///
    /// At most `generate_ceiling` samples are produced per call. When fewer
    /// samples are available than requested, the generator hook (if any) is
    /// asked for more once. If that is still not enough the buffer writes
    /// `underrun_samples` samples of silence instead and leaves the cursor in
    /// place. A finished buffer flushes its short tail padded with silence.
    ///
    /// The count is always a whole number of samples; a trailing partial
    /// sample in `out` is left untouched, and an `out` shorter than one
    /// sample gets nothing.
    pub fn pull_samples(&self, out: &mut [u8]) -> usize {
        let width = self.format.byte_width();
        let to_generate = self.generate_ceiling.min(out.len() / width);

        // Not even room for one sample
        if to_generate == 0 {
            return 0;
        }

        let mut cursor = self.cursor.lock();

        if let Some(written) = self.copy_from(&mut cursor, out, to_generate) {
            return written;
        }

        if let Some(generator) = &self.shared.generator {
            let missing = to_generate.saturating_sub(self.available(*cursor));
            self.top_up(generator, missing);

            if let Some(written) = self.copy_from(&mut cursor, out, to_generate) {
                return written;
            }
        }

        if self.is_finished() {
            if let Some(written) = self.flush_tail(&mut cursor, out) {
                return written;
            }
        }

        self.underruns.fetch_add(1, Ordering::Relaxed);
        let bytes = (self.underrun_samples * width).min(to_generate * width);
        out[..bytes].fill(0);
        log::trace!("Buffer underrun, wrote {} bytes of silence", bytes);
        bytes
    }

    /// Copy `samples` samples if that many are available
    fn copy_from(&self, cursor: &mut usize, out: &mut [u8], samples: usize) -> Option<usize> {
        let width = self.format.byte_width();
        let payload = self.shared.payload.read();

        if payload.len() / width < *cursor + samples {
            return None;
        }

        let start = *cursor * width;
        let bytes = samples * width;
        out[..bytes].copy_from_slice(&payload[start..start + bytes]);
        *cursor += samples;
        Some(bytes)
    }

    /// Copy whatever is left and pad with silence up to the underrun floor
    fn flush_tail(&self, cursor: &mut usize, out: &mut [u8]) -> Option<usize> {
        let width = self.format.byte_width();
        let payload = self.shared.payload.read();

        let remaining = (payload.len() / width).saturating_sub(*cursor);
        if remaining == 0 {
            return None;
        }

        let start = *cursor * width;
        let bytes = remaining * width;
        out[..bytes].copy_from_slice(&payload[start..start + bytes]);
        *cursor += remaining;

        let whole = out.len() / width * width;
        let padded = (self.underrun_samples * width).min(whole).max(bytes);
        out[bytes..padded].fill(0);
        Some(padded)
    }

    fn top_up(&self, generator: &Mutex<Box<dyn PcmGenerator>>, samples: usize) {
        let width = self.format.byte_width();
        let mut generator = generator.lock();
        let mut payload = self.shared.payload.write();

        let before = payload.len();
        let generated = generator.generate(&mut payload, samples, self.format);

        // Never keep a partial sample
        let whole = before + (payload.len() - before) / width * width;
        if whole != payload.len() {
            log::warn!(
                "Generator produced a partial sample, dropping {} bytes",
                payload.len() - whole
            );
            payload.truncate(whole);
        }

        log::trace!(
            "Generator produced {} of {} requested samples",
            generated,
            samples
        );
    }

    /// Move the cursor to `sample_index` (negative values clamp to 0).
    ///
    /// The payload is not touched; seeking past the end simply makes the
    /// next pulls underrun until enough data has been appended.
    pub fn seek(&self, sample_index: i64) {
        *self.cursor.lock() = sample_index.max(0) as usize;
    }

    /// New handle sharing this buffer's payload, with its own cursor at the
    /// start.
    pub fn shallow_copy(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cursor: Mutex::new(0),
            format: self.format,
            descriptor: self.descriptor,
            underrun_samples: self.underrun_samples,
            generate_ceiling: self.generate_ceiling,
            underruns: AtomicU64::new(0),
        }
    }

    /// Mark the payload as complete. Pulls then play out a short tail
    /// instead of withholding it.
    pub fn finish(&self) {
        self.shared.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        self.descriptor
    }

    pub fn set_descriptor(&mut self, descriptor: StreamDescriptor) {
        self.descriptor = Some(descriptor);
    }

    /// Sample rate from the descriptor, if one has been set
    pub fn sample_rate(&self) -> Option<u32> {
        self.descriptor.map(|d| d.sample_rate)
    }

    pub fn channels(&self) -> Option<u16> {
        self.descriptor.map(|d| d.channels)
    }

    pub fn len_bytes(&self) -> usize {
        self.shared.payload.read().len()
    }

    pub fn len_samples(&self) -> usize {
        self.len_bytes() / self.format.byte_width()
    }

    /// Cursor position in samples
    pub fn position(&self) -> usize {
        *self.cursor.lock()
    }

    pub fn remaining_samples(&self) -> usize {
        let cursor = self.cursor.lock();
        self.available(*cursor)
    }

    fn available(&self, cursor: usize) -> usize {
        self.len_samples().saturating_sub(cursor)
    }

    /// Number of pulls answered with silence on this handle
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Number of handles sharing the payload
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Whether two handles share the same payload
    pub fn shares_payload_with(&self, other: &StreamingBuffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for StreamingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBuffer")
            .field("format", &self.format)
            .field("descriptor", &self.descriptor)
            .field("len_bytes", &self.len_bytes())
            .field("position", &self.position())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn settings(underrun: usize, ceiling: usize) -> StreamSettings {
        StreamSettings {
            underrun_samples: underrun,
            generate_ceiling: ceiling,
            ..StreamSettings::default()
        }
    }

    fn ramp(bytes: usize) -> Vec<u8> {
        (0..bytes).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_empty_buffer_underruns_with_silence() {
        for format in [PcmFormat::Int16, PcmFormat::Float32] {
            let buffer = StreamingBuffer::new(format, &settings(512, 1024));
            let mut out = vec![0xAA; 4096];

            let written = buffer.pull_samples(&mut out);
            assert_eq!(written, 512 * format.byte_width());
            assert!(out[..written].iter().all(|&b| b == 0));
            assert_eq!(buffer.position(), 0);
            assert_eq!(buffer.underrun_count(), 1);
        }
    }

    #[test]
    fn test_round_trip() {
        let buffer = StreamingBuffer::new(PcmFormat::Int16, &settings(4, 16));
        let data = ramp(200);
        buffer.append(&data);

        // Requests of 32 bytes are capped at 16 samples
        let mut collected = Vec::new();
        let mut out = [0u8; 40];
        while collected.len() < data.len() {
            let want = (data.len() - collected.len()).min(out.len());
            let written = buffer.pull_samples(&mut out[..want]);
            collected.extend_from_slice(&out[..written]);
        }

        assert_eq!(collected, data);
        assert_eq!(buffer.underrun_count(), 0);
    }

    #[test]
    fn test_ceiling_limits_each_pull() {
        let buffer = StreamingBuffer::new(PcmFormat::Int16, &settings(4, 16));
        buffer.append(&ramp(400));

        let mut out = [0u8; 400];
        assert_eq!(buffer.pull_samples(&mut out), 32);
        assert_eq!(buffer.position(), 16);
    }

    #[test]
    fn test_misaligned_append_is_ignored() {
        let buffer = StreamingBuffer::new(PcmFormat::Float32, &settings(4, 16));
        buffer.append(&[1, 2, 3, 4]);
        buffer.append(&[1, 2, 3, 4, 5, 6]);
        buffer.append(&[]);
        assert_eq!(buffer.len_bytes(), 4);
    }

    #[test]
    fn test_partial_availability_underruns_until_enough() {
        let buffer = StreamingBuffer::new(PcmFormat::Int16, &settings(4, 8));
        buffer.append(&ramp(6));

        let mut out = [0xFFu8; 16];
        assert_eq!(buffer.pull_samples(&mut out), 8);
        assert!(out[..8].iter().all(|&b| b == 0));

        buffer.append(&ramp(10));
        assert_eq!(buffer.pull_samples(&mut out), 16);
        assert_eq!(&out[..6], &ramp(6)[..]);
    }

    #[test]
    fn test_finished_buffer_flushes_tail() {
        let buffer = StreamingBuffer::new(PcmFormat::Int16, &settings(4, 8));
        let data = ramp(20);
        buffer.append(&data);
        buffer.finish();

        let mut out = [0xFFu8; 16];
        assert_eq!(buffer.pull_samples(&mut out), 16);
        assert_eq!(&out[..], &data[..16]);

        // Two samples left: copied, then padded to the underrun floor
        assert_eq!(buffer.pull_samples(&mut out), 8);
        assert_eq!(&out[..4], &data[16..]);
        assert!(out[4..8].iter().all(|&b| b == 0));

        // Drained: plain silence from now on
        assert_eq!(buffer.pull_samples(&mut out), 8);
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_seek_replays() {
        let buffer = StreamingBuffer::new(PcmFormat::Int16, &settings(2, 4));
        let data = ramp(32);
        buffer.append(&data);

        let mut out = [0u8; 8];
        buffer.pull_samples(&mut out);
        buffer.pull_samples(&mut out);
        assert_eq!(&out[..], &data[8..16]);

        buffer.seek(0);
        buffer.pull_samples(&mut out);
        assert_eq!(&out[..], &data[..8]);

        buffer.seek(-10);
        assert_eq!(buffer.position(), 0);

        buffer.seek(3);
        buffer.pull_samples(&mut out);
        assert_eq!(&out[..], &data[6..14]);
    }

    #[test]
    fn test_shallow_copies_are_independent() {
        let original = StreamingBuffer::new(PcmFormat::Int16, &settings(2, 4));
        let data = ramp(64);
        original.append(&data);

        let copy = original.shallow_copy();
        assert!(copy.shares_payload_with(&original));
        assert_eq!(original.handle_count(), 2);

        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        original.pull_samples(&mut a);
        original.pull_samples(&mut a);
        copy.pull_samples(&mut b);

        assert_eq!(original.position(), 8);
        assert_eq!(copy.position(), 4);
        assert_eq!(&b[..], &data[..8]);

        copy.seek(12);
        assert_eq!(original.position(), 8);

        // Appends through either handle are visible to both
        copy.append(&[9, 9]);
        assert_eq!(original.len_bytes(), 66);

        drop(copy);
        assert_eq!(original.handle_count(), 1);
    }

    #[test]
    fn test_generator_tops_up() {
        let buffer = StreamingBuffer::with_generator(
            PcmFormat::Int16,
            &settings(2, 4),
            |payload: &mut Vec<u8>, samples: usize, format: PcmFormat| {
                payload.extend(std::iter::repeat(7).take(samples * format.byte_width()));
                samples
            },
        );

        let mut out = [0u8; 8];
        assert_eq!(buffer.pull_samples(&mut out), 8);
        assert_eq!(out, [7; 8]);
        assert_eq!(buffer.len_samples(), 4);
        assert_eq!(buffer.underrun_count(), 0);
    }

    #[test]
    fn test_generator_partial_sample_is_trimmed() {
        let buffer = StreamingBuffer::with_generator(
            PcmFormat::Float32,
            &settings(1, 2),
            |payload: &mut Vec<u8>, _samples: usize, _format: PcmFormat| {
                payload.extend_from_slice(&[1, 2, 3, 4, 5]);
                1
            },
        );

        let mut out = [0u8; 8];
        // One whole sample is not enough for a two-sample pull
        assert_eq!(buffer.pull_samples(&mut out), 4);
        assert_eq!(buffer.len_bytes(), 4);
    }

    #[test]
    fn test_concurrent_append_and_pull() {
        let buffer = Arc::new(StreamingBuffer::new(PcmFormat::Int16, &settings(16, 64)));
        let data = ramp(64 * 1024);

        let producer = {
            let buffer = Arc::clone(&buffer);
            let data = data.clone();
            thread::spawn(move || {
                for chunk in data.chunks(256) {
                    buffer.append(chunk);
                }
                buffer.finish();
            })
        };

        let mut collected = Vec::new();
        let mut out = [0u8; 128];
        while collected.len() < data.len() {
            let before = buffer.position();
            let written = buffer.pull_samples(&mut out);
            let advanced = (buffer.position() - before) * 2;
            collected.extend_from_slice(&out[..advanced.min(written)]);
        }

        producer.join().unwrap();
        assert_eq!(collected, data);
    }

    #[test]
    fn test_pulls_whole_samples_only() {
        let buffer = StreamingBuffer::new(PcmFormat::Int16, &settings(4, 8));

        // Underrun into an odd-sized request stops at the last whole sample
        let mut out = [0xFFu8; 5];
        assert_eq!(buffer.pull_samples(&mut out), 4);
        assert_eq!(out[4], 0xFF);
        assert_eq!(buffer.underrun_count(), 1);

        // Too small for a single sample: nothing written, not an underrun
        buffer.append(&ramp(10));
        let mut tiny = [0xFFu8; 1];
        assert_eq!(buffer.pull_samples(&mut tiny), 0);
        assert_eq!(tiny, [0xFF]);
        assert_eq!(buffer.underrun_count(), 1);
        assert_eq!(buffer.position(), 0);

        let mut out = [0u8; 8];
        assert_eq!(buffer.pull_samples(&mut out), 8);

        // Finished tail padding is clamped the same way
        buffer.finish();
        let mut out = [0xFFu8; 5];
        assert_eq!(buffer.pull_samples(&mut out), 4);
        assert_eq!(&out[..2], &ramp(10)[8..]);
        assert_eq!(&out[2..4], &[0, 0]);
        assert_eq!(out[4], 0xFF);
    }

    #[test]
    fn test_shallow_copy_flushes_tail_of_finished_buffer() {
        let original = StreamingBuffer::new(PcmFormat::Int16, &settings(4, 8));
        let data = ramp(20);
        original.append(&data);
        original.finish();

        let copy = original.shallow_copy();
        assert!(copy.is_finished());

        let mut out = [0xFFu8; 16];
        assert_eq!(copy.pull_samples(&mut out), 16);
        assert_eq!(copy.pull_samples(&mut out), 8);
        assert_eq!(&out[..4], &data[16..]);
        assert!(out[4..8].iter().all(|&b| b == 0));
        assert_eq!(copy.position(), 10);

        // The original still starts from the top
        assert_eq!(original.position(), 0);
        assert_eq!(original.pull_samples(&mut out), 16);
        assert_eq!(&out[..], &data[..16]);
    }

    #[test]
    fn test_seek_while_pulling() {
        const SAMPLES: usize = 4096;
        let buffer = Arc::new(StreamingBuffer::new(PcmFormat::Int16, &settings(8, 32)));
        // Each sample holds its own index
        let data: Vec<u8> = (0..SAMPLES as u16).flat_map(|i| i.to_le_bytes()).collect();
        buffer.append(&data);

        let seeker = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..2000i64 {
                    buffer.seek((i * 37) % SAMPLES as i64);
                    if i % 100 == 0 {
                        buffer.seek(-1);
                    }
                }
            })
        };

        let mut out = [0u8; 64];
        for _ in 0..2000 {
            let written = buffer.pull_samples(&mut out);
            assert_eq!(written % 2, 0);

            let samples: Vec<u16> = out[..written]
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            let silent = samples.iter().all(|&s| s == 0);
            let contiguous = samples.windows(2).all(|w| w[1] == w[0] + 1);
            assert!(silent || contiguous, "torn read: {:?}", samples);
            assert!(buffer.position() <= SAMPLES);
        }

        seeker.join().unwrap();
    }
}
