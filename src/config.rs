use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::format::{ApplicationProfile, StreamFormat};
use crate::audio::frame_size::{self, DEFAULT_MULTIPLE};
use crate::audio::transcode::{DecodeJob, EncodeJob};
use crate::error::ConfigError;

/// Prefix of environment overrides, e.g. `OPUSPACK__CODEC__MULTIPLE=8`.
pub const ENV_PREFIX: &str = "OPUSPACK";

/// Run configuration: codec defaults plus the jobs to execute.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub codec: CodecSettings,
    pub encode: Vec<EncodeEntry>,
    pub decode: Vec<DecodeJob>,
}

/// `[codec]` section; per-job values fall back to these.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecSettings {
    pub profile: ApplicationProfile,
    /// Frame duration as a multiple of 2.5 ms
    pub multiple: u32,
    /// Encoder bitrate in bits/s
    pub bitrate: Option<i32>,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            profile: ApplicationProfile::default(),
            multiple: DEFAULT_MULTIPLE,
            bitrate: None,
        }
    }
}

/// One `[[encode]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncodeEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default)]
    pub target_format: Option<StreamFormat>,
    #[serde(default)]
    pub profile: Option<ApplicationProfile>,
    #[serde(default)]
    pub multiple: Option<u32>,
}

impl EncodeEntry {
    /// Resolve against the codec defaults.
    pub fn to_job(&self, codec: &CodecSettings) -> EncodeJob {
        EncodeJob {
            source: self.source.clone(),
            destination: self.destination.clone(),
            target_format: self.target_format,
            profile: self.profile.unwrap_or(codec.profile),
            multiple: self.multiple.unwrap_or(codec.multiple),
        }
    }
}

impl Config {
    /// Load `path` (format from its extension) with `OPUSPACK__*` overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parse TOML text without environment overrides.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn encode_jobs(&self) -> Vec<EncodeJob> {
        self.encode.iter().map(|e| e.to_job(&self.codec)).collect()
    }

    /// Reject anything that is known to fail before a job starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        frame_size::validate_multiple(self.codec.multiple)?;
        if let Some(bits) = self.codec.bitrate {
            if bits <= 0 {
                return Err(ConfigError::InvalidFormat(format!(
                    "bitrate must be positive, got {bits}"
                )));
            }
        }

        for job in self.encode_jobs() {
            frame_size::validate_multiple(job.multiple)?;
            if let Some(target) = job.target_format {
                target.validate()?;
                frame_size::frame_size(target.sample_rate, job.multiple)?;
            }
        }
        for job in &self.decode {
            if let Some(output) = job.output_format {
                output.validate()?;
            }
        }
        Ok(())
    }
}
