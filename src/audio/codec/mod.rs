//! Codec dispatch
//!
//! Turns raw file bytes into a uniform [`DecodeOutput`]. Each format is an
//! independent [`Codec`]; the [`CodecRegistry`] picks one by format hint,
//! file name suffix or, as a last resort, content sniffing.

mod compressed;
mod wav;

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::pcm::{PcmFormat, SampleEncoding, StreamDescriptor};

pub use compressed::CompressedCodec;
pub use wav::WavCodec;

/// Errors that can occur while turning a source into PCM
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to read {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Unsupported channel layout: {0} channels")]
    UnsupportedChannelLayout(u16),

    #[error("Decoder error: {0}")]
    DecodeEngineFailure(String),
}

/// Result of a successful decode
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    pub descriptor: StreamDescriptor,
    /// Layout of the samples in `pcm`
    pub encoding: SampleEncoding,
    /// Interleaved little-endian samples
    pub pcm: Vec<u8>,
}

/// A single decode strategy.
///
/// Implementations must be pure transforms: no side effects beyond
/// allocating the output.
pub trait Codec: Send + Sync {
    /// Short name, also accepted as a format hint
    fn name(&self) -> &'static str;

    /// Lowercase file extensions handled by this codec
    fn extensions(&self) -> &'static [&'static str];

    /// Whether the bytes look like this format
    fn sniff(&self, _bytes: &[u8]) -> bool {
        false
    }

    /// Decode `bytes`. Codecs that synthesize samples decode straight into
    /// `target`; container formats may return their native encoding instead.
    fn decode(&self, bytes: &[u8], target: PcmFormat) -> Result<DecodeOutput, DecodeError>;
}

/// The set of codecs available for dispatch
pub struct CodecRegistry {
    codecs: Vec<Box<dyn Codec>>,
}

impl Default for CodecRegistry {
    /// WAV plus everything symphonia can decode
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(WavCodec));
        registry.register(Box::new(CompressedCodec));
        registry
    }
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Add a codec. Earlier registrations win when extensions overlap.
    pub fn register(&mut self, codec: Box<dyn Codec>) {
        log::debug!("Registered codec {}", codec.name());
        self.codecs.push(codec);
    }

    /// Pick the codec for a source.
    ///
    /// A hint takes precedence over the file name. A name whose suffix is not
    /// recognised is rejected outright; only a source with neither hint nor
    /// suffix falls back to sniffing the content.
    pub fn select(
        &self,
        bytes: &[u8],
        hint: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<&dyn Codec, DecodeError> {
        if let Some(hint) = hint {
            let hint = hint.trim_start_matches('.').to_ascii_lowercase();
            return self
                .codecs
                .iter()
                .find(|c| c.name() == hint || c.extensions().contains(&hint.as_str()))
                .map(|c| c.as_ref())
                .ok_or(DecodeError::UnsupportedFormat(hint));
        }

        let extension = file_name
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension {
            Some(ext) => self
                .codecs
                .iter()
                .find(|c| c.extensions().contains(&ext.as_str()))
                .map(|c| c.as_ref())
                .ok_or(DecodeError::UnsupportedFormat(ext)),
            None => self
                .codecs
                .iter()
                .find(|c| c.sniff(bytes))
                .map(|c| c.as_ref())
                .ok_or_else(|| {
                    DecodeError::UnsupportedFormat("unrecognised content".to_string())
                }),
        }
    }

    /// Select a codec and decode with it
    pub fn decode(
        &self,
        bytes: &[u8],
        hint: Option<&str>,
        file_name: Option<&str>,
        target: PcmFormat,
    ) -> Result<DecodeOutput, DecodeError> {
        let codec = self.select(bytes, hint, file_name)?;
        if bytes.is_empty() {
            return Err(DecodeError::MalformedContainer("empty input".to_string()));
        }

        log::debug!(
            "Decoding {} bytes with {} codec",
            bytes.len(),
            codec.name()
        );
        let output = codec.decode(bytes, target)?;

        if output.descriptor.channels > 2 {
            return Err(DecodeError::UnsupportedChannelLayout(
                output.descriptor.channels,
            ));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wav_bytes;

    #[test]
    fn test_select_by_extension_is_case_insensitive() {
        let registry = CodecRegistry::default();
        let codec = registry.select(&[], None, Some("Loop.WAV")).unwrap();
        assert_eq!(codec.name(), "wav");

        let codec = registry.select(&[], None, Some("music/track.Ogg")).unwrap();
        assert_eq!(codec.name(), "compressed");
    }

    #[test]
    fn test_hint_overrides_file_name() {
        let registry = CodecRegistry::default();
        let codec = registry.select(&[], Some(".wav"), Some("clip.mp3")).unwrap();
        assert_eq!(codec.name(), "wav");
    }

    #[test]
    fn test_unknown_extension_is_rejected_without_decode() {
        let registry = CodecRegistry::default();
        let wav = wav_bytes(8000, 1, 16, &[0; 32]);

        // Valid WAV content but the suffix wins
        let err = registry
            .decode(&wav, None, Some("clip.xyz"), PcmFormat::Int16)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(ref e) if e == "xyz"));
    }

    #[test]
    fn test_unknown_hint_is_rejected() {
        let registry = CodecRegistry::default();
        let err = registry.select(&[], Some("midi"), None).err().unwrap();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_sniff_without_name() {
        let registry = CodecRegistry::default();
        let wav = wav_bytes(8000, 1, 16, &[0; 32]);
        let out = registry.decode(&wav, None, None, PcmFormat::Int16).unwrap();
        assert_eq!(out.descriptor.sample_rate, 8000);

        let err = registry
            .decode(b"definitely not audio", None, None, PcmFormat::Int16)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_input() {
        let registry = CodecRegistry::default();
        let err = registry
            .decode(&[], None, Some("a.wav"), PcmFormat::Int16)
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedContainer(_)));
    }

    struct Silence;

    impl Codec for Silence {
        fn name(&self) -> &'static str {
            "silence"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["sil"]
        }

        fn decode(&self, bytes: &[u8], target: PcmFormat) -> Result<DecodeOutput, DecodeError> {
            let pcm = vec![0; bytes.len() * target.byte_width()];
            Ok(DecodeOutput {
                descriptor: StreamDescriptor::from_payload_len(
                    100,
                    1,
                    pcm.len(),
                    target.encoding(),
                ),
                encoding: target.encoding(),
                pcm,
            })
        }
    }

    #[test]
    fn test_register_custom_codec() {
        let mut registry = CodecRegistry::default();
        registry.register(Box::new(Silence));

        let out = registry
            .decode(&[1; 10], None, Some("x.SIL"), PcmFormat::Float32)
            .unwrap();
        assert_eq!(out.pcm.len(), 40);
        assert_eq!(out.descriptor.total_samples, 10);
    }
}
