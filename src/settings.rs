use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::PcmFormat;

/// Samples generated per render callback unless configured otherwise
#[cfg(target_os = "ios")]
pub const DEFAULT_GENERATE_CEILING: usize = 8 * 1024;
#[cfg(not(target_os = "ios"))]
pub const DEFAULT_GENERATE_CEILING: usize = 1024;

/// Samples of silence written when a pull cannot be satisfied
pub const DEFAULT_UNDERRUN_SAMPLES: usize = 512;

/// Errors from reading or writing a settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Returns the path to the settings file: `~/.config/wavefeed/settings.json`
fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("wavefeed");
    path.push("settings.json");
    path
}

/// Tunables for buffers and the decode pipeline.
///
/// Serialized as JSON. Fields use `#[serde(default)]` so that adding new
/// settings won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    // Render path
    pub underrun_samples: usize,
    pub generate_ceiling: usize,
    pub output_format: PcmFormat,

    // Pipeline
    pub worker_threads: usize,

    // Live feeds
    pub live_feed_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            underrun_samples: DEFAULT_UNDERRUN_SAMPLES,
            generate_ceiling: DEFAULT_GENERATE_CEILING,
            output_format: PcmFormat::default(),

            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),

            live_feed_capacity: 64 * 1024,
        }
    }
}

impl StreamSettings {
    /// Load settings from the platform config directory, falling back to
    /// defaults on any error.
    pub fn load() -> Self {
        let path = settings_path();
        match Self::load_from(&path) {
            Ok(settings) => {
                log::info!("Loaded settings from {}", path.display());
                settings
            }
            Err(SettingsError::Io(e)) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
            Err(e) => {
                log::warn!("Failed to parse settings ({}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        Ok(settings.sanitized())
    }

    /// Write settings as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamp values so that `generate_ceiling >= underrun_samples >= 1` and
    /// at least one worker exists.
    pub fn sanitized(&self) -> Self {
        let underrun_samples = self.underrun_samples.max(1);
        Self {
            underrun_samples,
            generate_ceiling: self.generate_ceiling.max(underrun_samples),
            output_format: self.output_format,
            worker_threads: self.worker_threads.max(1),
            live_feed_capacity: self.live_feed_capacity.max(1),
        }
    }
}
