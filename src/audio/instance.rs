//! Playable handle over a streaming buffer
//!
//! A [`SoundInstance`] is what a render callback holds on to. Every call to
//! [`SoundInstance::play`] starts from the first sample, so one decoded
//! buffer can be triggered any number of times. Instances made with
//! [`SoundInstance::from_shared`] share the payload but not the position.

use std::sync::atomic::{AtomicBool, Ordering};

use super::buffer::StreamingBuffer;

pub struct SoundInstance {
    buffer: StreamingBuffer,
    playing: AtomicBool,
}

impl SoundInstance {
    /// Take ownership of `buffer`. The instance starts stopped.
    pub fn new(buffer: StreamingBuffer) -> Self {
        Self {
            buffer,
            playing: AtomicBool::new(false),
        }
    }

    /// New instance over a shallow copy of `buffer`
    pub fn from_shared(buffer: &StreamingBuffer) -> Self {
        Self::new(buffer.shallow_copy())
    }

    /// Rewind to sample 0 and start playing
    pub fn play(&self) {
        self.buffer.seek(0);
        self.playing.store(true, Ordering::Release);
        log::debug!("Playing sound instance from the start");
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Render into `out` and return the number of bytes written.
    ///
    /// A stopped instance writes silence for every whole sample in `out`.
    pub fn render(&self, out: &mut [u8]) -> usize {
        if self.is_playing() {
            return self.buffer.pull_samples(out);
        }

        let width = self.buffer.format().byte_width();
        let bytes = out.len() / width * width;
        out[..bytes].fill(0);
        bytes
    }

    pub fn buffer(&self) -> &StreamingBuffer {
        &self.buffer
    }
}
