//! Audio module - PCM buffering and decoding
//!
//! This module provides:
//! - Streaming buffer shared between a producer and the render thread
//! - Lock-free live feed for progressively generated audio
//! - Sound instances that rewind on every play
//! - Codec dispatch for WAV and compressed formats

mod buffer;
pub mod codec;
mod feed;
mod instance;
pub mod pcm;

pub use buffer::{PcmGenerator, StreamingBuffer};
pub use codec::{Codec, CodecRegistry, DecodeError, DecodeOutput};
pub use feed::{live_buffer, live_feed, FeedGenerator, FeedWriter};
pub use instance::SoundInstance;
pub use pcm::{PcmFormat, SampleEncoding, StreamDescriptor};
