//! Compressed stream decoding
//!
//! This module decodes compressed formats (and any other container symphonia
//! understands) fully into memory using symphonia.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{Codec, DecodeError, DecodeOutput};
use crate::audio::pcm::{PcmFormat, StreamDescriptor};

/// Quality metadata read from the container before decoding
#[derive(Debug, Clone, Copy)]
struct StreamInfo {
    sample_rate: u32,
    channels: u16,
    /// Frame count, when the container knows it
    frames: Option<u64>,
}

impl StreamInfo {
    fn from_params(params: &CodecParameters) -> Self {
        Self {
            sample_rate: params.sample_rate.unwrap_or(0),
            channels: params.channels.map(|c| c.count() as u16).unwrap_or(0),
            frames: params.n_frames,
        }
    }

    /// Bytes the decoded stream is expected to take in `format`
    fn expected_bytes(&self, format: PcmFormat) -> usize {
        self.frames.unwrap_or(0) as usize * self.channels as usize * format.byte_width()
    }
}

/// Decoder for compressed codec streams (Ogg Vorbis, MP3, FLAC, AAC, ...)
pub struct CompressedCodec;

impl Codec for CompressedCodec {
    fn name(&self) -> &'static str {
        "compressed"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ogg", "oga", "mp3", "flac", "m4a", "aac", "aiff", "aif", "caf", "mka", "webm"]
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(b"OggS")
            || bytes.starts_with(b"fLaC")
            || bytes.starts_with(b"ID3")
            || (bytes.len() >= 12 && &bytes[0..4] == b"FORM" && &bytes[8..11] == b"AIF")
            || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
    }

    fn decode(&self, bytes: &[u8], target: PcmFormat) -> Result<DecodeOutput, DecodeError> {
        decode_stream(bytes, target)
    }
}

/// Decode an in-memory stream. The container is identified from its content.
fn decode_stream(bytes: &[u8], target: PcmFormat) -> Result<DecodeOutput, DecodeError> {
    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());
    let hint = Hint::new();

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::DecodeEngineFailure(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::DecodeEngineFailure("no audio tracks found".to_string()))?;

    let track_id = track.id;
    let info = StreamInfo::from_params(&track.codec_params);

    if info.channels > 2 {
        log::error!("Compressed stream has unsupported number of channels {}", info.channels);
        return Err(DecodeError::UnsupportedChannelLayout(info.channels));
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::DecodeEngineFailure(e.to_string()))?;

    let mut pcm = Vec::with_capacity(info.expected_bytes(target));
    let mut sample_rate = info.sample_rate;
    let mut channels = info.channels;
    let mut frames: u64 = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::DecodeEngineFailure(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::DecodeEngineFailure(e.to_string())),
        };

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count() as u16;
        if packet_channels > 2 {
            return Err(DecodeError::UnsupportedChannelLayout(packet_channels));
        }
        // Some containers only reveal the layout once the first packet is decoded
        sample_rate = spec.rate;
        channels = packet_channels;
        frames += decoded.frames() as u64;

        match target {
            PcmFormat::Int16 => {
                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                for s in buf.samples() {
                    pcm.extend_from_slice(&s.to_le_bytes());
                }
            }
            PcmFormat::Float32 => {
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                for s in buf.samples() {
                    pcm.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
    }

    if frames == 0 || sample_rate == 0 || channels == 0 {
        return Err(DecodeError::DecodeEngineFailure(
            "stream produced no audio".to_string(),
        ));
    }

    if let Some(expected) = info.frames {
        if expected != frames {
            log::debug!("Container announced {} frames, decoded {}", expected, frames);
        }
    }

    Ok(DecodeOutput {
        descriptor: StreamDescriptor::from_frames(sample_rate, channels, frames),
        encoding: target.encoding(),
        pcm,
    })
}
