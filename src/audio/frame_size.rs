//! Codec frame sizing.
//!
//! The codec consumes fixed-duration frames built from a 2.5 ms unit. Only
//! 2.5, 5, 10, 20, 40, 60, 80, 100 and 120 ms are accepted by the engine, so
//! the multiple has to be one of [`VALID_MULTIPLES`].

use crate::error::ConfigError;

/// Largest multiple of 2.5 ms (120 ms).
pub const MAX_MULTIPLE: u32 = 48;

/// Multiples of 2.5 ms that land on an accepted frame duration.
pub const VALID_MULTIPLES: [u32; 9] = [1, 2, 4, 8, 16, 24, 32, 40, 48];

/// Default multiple: 60 ms frames.
pub const DEFAULT_MULTIPLE: u32 = 24;

/// Check a duration multiple without knowing the sample rate yet.
pub fn validate_multiple(multiple: u32) -> Result<(), ConfigError> {
    if multiple == 0 || multiple > MAX_MULTIPLE {
        return Err(ConfigError::MultipleOutOfRange(multiple));
    }
    if !VALID_MULTIPLES.contains(&multiple) {
        return Err(ConfigError::UnsupportedDuration { multiple });
    }
    Ok(())
}

/// Samples per channel in one codec frame: `sample_rate × 0.0025 × multiple`.
pub fn frame_size(sample_rate: u32, multiple: u32) -> Result<u32, ConfigError> {
    validate_multiple(multiple)?;
    if sample_rate == 0 {
        return Err(ConfigError::InvalidFormat("sample rate must be positive".into()));
    }
    // 2.5 ms == 1/400 s
    let scaled = sample_rate as u64 * multiple as u64;
    if scaled % 400 != 0 {
        return Err(ConfigError::FractionalFrame {
            sample_rate,
            multiple,
        });
    }
    Ok((scaled / 400) as u32)
}

/// The multiple whose frame at `sample_rate` holds exactly `samples_per_frame` samples.
pub fn multiple_for(sample_rate: u32, samples_per_frame: u32) -> Option<u32> {
    VALID_MULTIPLES
        .iter()
        .copied()
        .find(|&m| frame_size(sample_rate, m).is_ok_and(|n| n == samples_per_frame))
}

/// Frame duration in milliseconds for a multiple.
pub fn duration_ms(multiple: u32) -> f32 {
    multiple as f32 * 2.5
}

/// Rescale a sample-frame count to another rate, truncating.
pub fn rescale_frames(total: u64, from_rate: u32, to_rate: u32) -> u64 {
    if from_rate == 0 || from_rate == to_rate {
        return total;
    }
    (total as u128 * to_rate as u128 / from_rate as u128) as u64
}
