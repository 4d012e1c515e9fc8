//! Raw PCM stream layout and codec tuning profile.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bit depths the adapter and container can describe.
pub const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Layout of interleaved linear PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bits per sample (8, 16, 24 or 32, signed integer)
    pub bit_depth: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16, bit_depth: u16) -> Result<Self, ConfigError> {
        let format = Self {
            sample_rate,
            channels,
            bit_depth,
        };
        format.validate()?;
        Ok(format)
    }

    /// Signed-integer packed PCM, arguments in (rate, bits, channels) order.
    pub fn pcm(sample_rate: u32, bit_depth: u16, channels: u16) -> Result<Self, ConfigError> {
        Self::new(sample_rate, channels, bit_depth)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidFormat("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidFormat("channel count must be positive".into()));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            return Err(ConfigError::InvalidFormat(format!(
                "unsupported bit depth {}",
                self.bit_depth
            )));
        }
        Ok(())
    }

    /// Bytes in one sample frame (all channels).
    pub fn bytes_per_frame(&self) -> u32 {
        self.channels as u32 * self.bit_depth as u32 / 8
    }
}

/// Codec tuning hint, passed through to the engine untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationProfile {
    /// Speech
    Voice,
    /// General audio
    #[default]
    Music,
    /// Lowest algorithmic delay
    LowDelay,
}

impl ApplicationProfile {
    pub(crate) fn to_opus(self) -> opus::Application {
        match self {
            ApplicationProfile::Voice => opus::Application::Voip,
            ApplicationProfile::Music => opus::Application::Audio,
            ApplicationProfile::LowDelay => opus::Application::LowDelay,
        }
    }
}
