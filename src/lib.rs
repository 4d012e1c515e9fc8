//! opuspack - converts PCM audio files to a compact Opus frame container
//! and back.

pub mod audio;
pub mod config;
pub mod error;

pub use audio::{
    ApplicationProfile, DecodeJob, EncodeJob, StreamFormat, TranscodeReport, Transcoder,
};
pub use error::{CodecError, ConfigError, ContainerError, Result, TranscodeError};
