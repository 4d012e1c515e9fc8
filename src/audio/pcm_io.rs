//! Audio file access used by the transcode pipeline.
//!
//! Implementations open PCM files, report their native layout, and convert
//! to or from a client layout on the fly. Samples always cross this boundary
//! as interleaved signed 16-bit PCM. Handles are released on drop.

use std::path::Path;

use super::format::StreamFormat;
use crate::error::Result;

/// A readable PCM stream.
pub trait PcmSource: Send {
    /// Layout of the data stored in the file.
    fn file_format(&self) -> StreamFormat;

    /// Sample frames in the file, at the file's own rate.
    fn total_frames(&self) -> u64;

    /// Deliver subsequent reads converted to `format`.
    fn set_client_format(&mut self, format: StreamFormat) -> Result<()>;

    /// Read up to `frames` sample frames into `out` (cleared first).
    ///
    /// Returns the number of frames read; fewer than requested only at end of stream.
    fn read_frames(&mut self, frames: usize, out: &mut Vec<i16>) -> Result<usize>;
}

/// A writable PCM stream.
pub trait PcmSink: Send {
    /// Accept subsequent writes in `format` and convert them to the file's layout.
    fn set_client_format(&mut self, format: StreamFormat) -> Result<()>;

    /// Append whole interleaved frames.
    fn write_frames(&mut self, samples: &[i16]) -> Result<()>;

    /// Flush buffered samples and finalize the file.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens PCM streams by path.
pub trait AudioIo: Send + Sync {
    fn open_read(&self, path: &Path) -> Result<Box<dyn PcmSource>>;

    /// Create `path` with the given layout, replacing any existing file.
    fn open_write(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn PcmSink>>;
}
