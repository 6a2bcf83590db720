//! PCM formats and stream metadata
//!
//! Payloads are interleaved little-endian samples. The render side only ever
//! sees one of the two [`PcmFormat`]s; decoders may produce any
//! [`SampleEncoding`], which is converted before it reaches a buffer.

use std::time::Duration;

use dasp_sample::{Sample, I24};
use serde::{Deserialize, Serialize};

/// Sample format of a streaming buffer's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PcmFormat {
    /// 16-bit signed integer samples
    #[default]
    Int16,
    /// 32-bit IEEE float samples
    Float32,
}

impl PcmFormat {
    /// Size in bytes of a single sample
    #[inline]
    pub fn byte_width(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Float32 => 4,
        }
    }

    /// The source encoding that matches this format byte-for-byte
    pub fn encoding(self) -> SampleEncoding {
        match self {
            Self::Int16 => SampleEncoding::S16,
            Self::Float32 => SampleEncoding::F32,
        }
    }
}

/// Encoding of samples as they come out of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    U8,
    S16,
    S24,
    S32,
    F32,
}

impl SampleEncoding {
    pub fn byte_width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::F32 => 4,
        }
    }
}

/// Stream metadata delivered alongside a payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
    /// Samples per channel (frames). Always `duration * sample_rate`.
    pub total_samples: u64,
}

impl StreamDescriptor {
    /// Derive a descriptor from a payload length so that duration and
    /// total samples always agree with the data.
    pub fn from_payload_len(
        sample_rate: u32,
        channels: u16,
        payload_len: usize,
        encoding: SampleEncoding,
    ) -> Self {
        let frame_bytes = encoding.byte_width() * channels.max(1) as usize;
        let frames = (payload_len / frame_bytes) as u64;
        Self::from_frames(sample_rate, channels, frames)
    }

    pub fn from_frames(sample_rate: u32, channels: u16, frames: u64) -> Self {
        let duration = if sample_rate > 0 {
            Duration::from_secs_f64(frames as f64 / sample_rate as f64)
        } else {
            Duration::ZERO
        };

        Self {
            sample_rate,
            channels,
            duration,
            total_samples: frames,
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f32 {
        self.duration.as_secs_f32()
    }
}

/// Convert a payload from `from` to the byte layout of `to`.
///
/// Matching layouts are passed through without copying. Otherwise a trailing
/// partial sample in the input is dropped.
pub fn convert(pcm: Vec<u8>, from: SampleEncoding, to: PcmFormat) -> Vec<u8> {
    if from == to.encoding() {
        return pcm;
    }

    let width = from.byte_width();
    let mut out = Vec::with_capacity(pcm.len() / width * to.byte_width());

    for chunk in pcm.chunks_exact(width) {
        match to {
            PcmFormat::Int16 => {
                let s: i16 = match from {
                    SampleEncoding::U8 => chunk[0].to_sample(),
                    SampleEncoding::S16 => i16::from_le_bytes([chunk[0], chunk[1]]),
                    SampleEncoding::S24 => read_s24(chunk).to_sample(),
                    SampleEncoding::S32 => read_s32(chunk).to_sample(),
                    SampleEncoding::F32 => read_f32(chunk).to_sample(),
                };
                out.extend_from_slice(&s.to_le_bytes());
            }
            PcmFormat::Float32 => {
                let s: f32 = match from {
                    SampleEncoding::U8 => chunk[0].to_sample(),
                    SampleEncoding::S16 => i16::from_le_bytes([chunk[0], chunk[1]]).to_sample(),
                    SampleEncoding::S24 => read_s24(chunk).to_sample(),
                    SampleEncoding::S32 => read_s32(chunk).to_sample(),
                    SampleEncoding::F32 => read_f32(chunk),
                };
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }

    out
}

#[inline]
fn read_s24(b: &[u8]) -> I24 {
    // Place the three bytes in the top of an i32, then shift back to sign-extend
    I24::new_unchecked(i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8)
}

#[inline]
fn read_s32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn read_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
