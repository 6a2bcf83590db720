//! wavefeed - decoded PCM on demand for real-time render callbacks
//!
//! Decoding runs on a background [`WorkerPool`](pipeline::WorkerPool); the
//! result is handed to a delivery thread that builds a
//! [`StreamingBuffer`](audio::StreamingBuffer). The render callback then
//! pulls fixed-size chunks from the buffer and is never left waiting: when
//! data is missing it gets silence.
//!
//! ```no_run
//! use wavefeed::audio::CodecRegistry;
//! use wavefeed::pipeline::{delivery_queue, DecodeJob, DecodePipeline, WorkerPool};
//! use wavefeed::settings::StreamSettings;
//!
//! let settings = StreamSettings::load();
//! let pool = WorkerPool::new(settings.worker_threads).unwrap();
//! let (queue, pump) = delivery_queue();
//! let pipeline = DecodePipeline::new(&pool, queue, CodecRegistry::default(), settings);
//!
//! pipeline.request(DecodeJob::from_path("music.ogg"), |buffer| {
//!     if let Some(buffer) = buffer {
//!         println!("{:?}", buffer.descriptor());
//!     }
//! });
//!
//! // On the delivery thread
//! pump.pump_timeout(std::time::Duration::from_secs(1));
//! ```

pub mod audio;
pub mod pipeline;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;
