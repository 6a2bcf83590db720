//! RIFF/WAVE container parsing
//!
//! `hound` interprets the header; the sample data region is then located with
//! a plain chunk walk and handed back as-is, at its native bit depth.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec};

use super::{Codec, DecodeError, DecodeOutput};
use crate::audio::pcm::{PcmFormat, SampleEncoding, StreamDescriptor};

/// Decoder for the WAV format.
pub struct WavCodec;

impl Codec for WavCodec {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["wav", "wave"]
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
    }

    fn decode(&self, bytes: &[u8], _target: PcmFormat) -> Result<DecodeOutput, DecodeError> {
        if !self.sniff(bytes) {
            return Err(malformed("missing RIFF/WAVE header"));
        }

        let spec = WavReader::new(Cursor::new(bytes))
            .map_err(from_hound)?
            .spec();

        let (offset, size) = find_data_chunk(bytes).ok_or_else(|| malformed("no data chunk"))?;
        let available = bytes.len() - offset;
        if size > available {
            log::warn!(
                "WAV data chunk claims {} bytes but only {} are present",
                size,
                available
            );
        }

        build_output(spec, &bytes[offset..offset + size.min(available)])
    }
}

/// Offset and declared length of the `data` chunk body
fn find_data_chunk(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body = pos + 8;

        if id == b"data" {
            return Some((body, size));
        }

        // Chunks are padded to an even length
        pos = body.saturating_add(size).saturating_add(size & 1);
    }
    None
}

fn build_output(spec: WavSpec, data: &[u8]) -> Result<DecodeOutput, DecodeError> {
    if spec.channels > 2 {
        log::error!(
            "Wave file has unsupported number of channels {}",
            spec.channels
        );
        return Err(DecodeError::UnsupportedChannelLayout(spec.channels));
    }
    if spec.sample_rate == 0 {
        return Err(malformed("zero sample rate"));
    }

    let encoding = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => SampleEncoding::U8,
        (SampleFormat::Int, 16) => SampleEncoding::S16,
        (SampleFormat::Int, 24) => SampleEncoding::S24,
        (SampleFormat::Int, 32) => SampleEncoding::S32,
        (SampleFormat::Float, 32) => SampleEncoding::F32,
        (format, bits) => {
            return Err(malformed(&format!(
                "unsupported sample format {:?} with {} bits",
                format, bits
            )))
        }
    };

    let frame_bytes = encoding.byte_width() * spec.channels as usize;
    let usable = data.len() / frame_bytes * frame_bytes;
    let pcm = data[..usable].to_vec();

    Ok(DecodeOutput {
        descriptor: StreamDescriptor::from_payload_len(
            spec.sample_rate,
            spec.channels,
            pcm.len(),
            encoding,
        ),
        encoding,
        pcm,
    })
}

fn from_hound(e: hound::Error) -> DecodeError {
    match e {
        hound::Error::Unsupported => malformed("unsupported WAV encoding"),
        e => malformed(&e.to_string()),
    }
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::MalformedContainer(reason.to_string())
}
