use std::path::PathBuf;

use thiserror::Error;

/// Errors detected before any file is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("frame duration multiple {0} is outside 1..=48")]
    MultipleOutOfRange(u32),

    #[error("{multiple} x 2.5 ms is not a codec frame duration")]
    UnsupportedDuration { multiple: u32 },

    #[error("{sample_rate} Hz does not give a whole number of samples per {multiple} x 2.5 ms frame")]
    FractionalFrame { sample_rate: u32, multiple: u32 },

    #[error("invalid stream format: {0}")]
    InvalidFormat(String),

    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Container framing and corruption errors.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("truncated header: have {have} bytes, need {need}")]
    TruncatedHeader { have: usize, need: usize },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("truncated frame #{index}: expected {expected} bytes, got {got}")]
    TruncatedFrame {
        index: u64,
        expected: usize,
        got: usize,
    },

    #[error("frame #{index} has zero length")]
    EmptyRecord { index: u64 },

    #[error("frame payload of {len} bytes does not fit a record")]
    RecordTooLarge { len: usize },

    #[error("container I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the codec engine.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("codec rejected {sample_rate} Hz / {channels} ch: {reason}")]
    Init {
        sample_rate: u32,
        channels: u16,
        reason: String,
    },

    #[error("encode failed with code {code}")]
    Encode { code: i32 },

    #[error("decode failed with code {code}")]
    Decode { code: i32 },

    #[error("frame holds {got} samples, codec expects {expected}")]
    FrameLength { expected: usize, got: usize },

    #[error("decoder produced {got} samples per channel, expected {expected}")]
    SampleCount { expected: u32, got: usize },
}

/// Outcome of a failed transcode run.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audio file error: {0}")]
    AudioFile(#[from] hound::Error),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to start transcode worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transcode worker panicked: {0}")]
    Panicked(String),
}

impl TranscodeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;
