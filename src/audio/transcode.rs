//! Frame-by-frame transcoding between PCM files and the Opus container.
//!
//! Encode: open source → resolve format → size frames → open codec →
//! replace destination → header → (read → progress → encode → record)*
//!
//! Decode: open container → header → create destination → open codec →
//! (record → progress → decode → write)*
//!
//! Every resource a run acquires is an owned local, so it is released exactly
//! once whichever way the run ends.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::container::{ContainerHeader, ContainerReader, ContainerWriter};
use super::format::{ApplicationProfile, StreamFormat};
use super::frame_size::{self, DEFAULT_MULTIPLE};
use super::opus_codec::{CodecBackend, FrameCodec, OpusBackend};
use super::pcm_io::AudioIo;
use super::wav_file::WavIo;
use crate::error::{Result, TranscodeError};

/// PCM file → container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Convert the source to this layout before encoding
    #[serde(default)]
    pub target_format: Option<StreamFormat>,
    #[serde(default)]
    pub profile: ApplicationProfile,
    /// Frame duration as a multiple of 2.5 ms
    #[serde(default = "default_multiple")]
    pub multiple: u32,
}

fn default_multiple() -> u32 {
    DEFAULT_MULTIPLE
}

impl EncodeJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            target_format: None,
            profile: ApplicationProfile::default(),
            multiple: DEFAULT_MULTIPLE,
        }
    }
}

/// Container → PCM file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Write the destination in this layout instead of the stored one
    #[serde(default)]
    pub output_format: Option<StreamFormat>,
}

impl DecodeJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            output_format: None,
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TranscodeReport {
    /// Format carried by the container
    pub format: StreamFormat,
    pub samples_per_frame: u32,
    /// Frames encoded or decoded
    pub frames: u64,
}

/// Drives the codec and the audio file adapter across a whole file.
#[derive(Debug, Clone, Default)]
pub struct Transcoder<I = WavIo, C = OpusBackend> {
    io: I,
    codec: C,
}

impl<I: AudioIo, C: CodecBackend> Transcoder<I, C> {
    pub fn new(io: I, codec: C) -> Self {
        Self { io, codec }
    }

    pub fn encode<P>(&self, job: &EncodeJob, mut progress: P) -> Result<TranscodeReport>
    where
        P: FnMut(f32),
    {
        // Configuration is checked before any file is opened
        frame_size::validate_multiple(job.multiple)?;
        if let Some(target) = &job.target_format {
            target.validate()?;
        }

        let mut source = self.io.open_read(&job.source)?;
        let native = source.file_format();
        let mut total_frames = source.total_frames();

        let format = match job.target_format {
            Some(target) if target != native => {
                source.set_client_format(target)?;
                total_frames =
                    frame_size::rescale_frames(total_frames, native.sample_rate, target.sample_rate);
                target
            }
            _ => native,
        };

        let samples_per_frame = frame_size::frame_size(format.sample_rate, job.multiple)?;
        let frame_count = total_frames / samples_per_frame as u64;

        log::info!(
            "encoding {} -> {}: {}Hz/{}ch/{}bit, {} samples/frame, {} frames ({} trailing samples dropped)",
            job.source.display(),
            job.destination.display(),
            format.sample_rate,
            format.channels,
            format.bit_depth,
            samples_per_frame,
            frame_count,
            total_frames % samples_per_frame as u64,
        );

        let mut session = self.codec.open(&format, samples_per_frame, job.profile)?;

        remove_existing(&job.destination)?;
        let file = File::create(&job.destination)
            .map_err(|e| TranscodeError::io(&job.destination, e))?;
        let header = ContainerHeader::new(format, frame_count as i64, samples_per_frame);
        let mut writer = ContainerWriter::new(BufWriter::new(file), header)?;

        let mut pcm = Vec::with_capacity(samples_per_frame as usize * format.channels as usize);
        for completed in 0..frame_count {
            let read = source.read_frames(samples_per_frame as usize, &mut pcm)?;
            if read < samples_per_frame as usize {
                log::warn!(
                    "{} ran out after {} of {} frames; dropping {} samples",
                    job.source.display(),
                    completed,
                    frame_count,
                    read
                );
                break;
            }

            progress(completed as f32 / frame_count as f32);

            let payload = session.encode_frame(&pcm)?;
            writer.write_record(&payload)?;
        }

        let frames = writer.records_written() as u64;
        writer.finish()?;
        progress(1.0);

        log::info!("encoded {} frames into {}", frames, job.destination.display());
        Ok(TranscodeReport {
            format,
            samples_per_frame,
            frames,
        })
    }

    pub fn decode<P>(&self, job: &DecodeJob, mut progress: P) -> Result<TranscodeReport>
    where
        P: FnMut(f32),
    {
        if let Some(output) = &job.output_format {
            output.validate()?;
        }

        let file = File::open(&job.source).map_err(|e| TranscodeError::io(&job.source, e))?;
        let mut reader = ContainerReader::open(BufReader::new(file))?;
        let header = *reader.header();

        let file_format = job.output_format.unwrap_or(header.format);
        let mut sink = self.io.open_write(&job.destination, file_format)?;
        if file_format != header.format {
            sink.set_client_format(header.format)?;
        }

        let mut session = self.codec.open(
            &header.format,
            header.samples_per_frame,
            ApplicationProfile::default(),
        )?;

        log::info!(
            "decoding {} -> {}: {}Hz/{}ch/{}bit, {} samples/frame, {} frames",
            job.source.display(),
            job.destination.display(),
            header.format.sample_rate,
            header.format.channels,
            header.format.bit_depth,
            header.samples_per_frame,
            header.frame_count,
        );

        let frame_count = header.frame_count as u64;
        let mut payload = Vec::new();
        for index in 0..frame_count {
            reader.read_record(&mut payload)?;
            progress(index as f32 / frame_count as f32);

            let pcm = session.decode_frame(&payload, header.samples_per_frame)?;
            sink.write_frames(&pcm)?;
        }

        sink.finish()?;
        progress(1.0);

        log::info!("decoded {} frames into {}", frame_count, job.destination.display());
        Ok(TranscodeReport {
            format: header.format,
            samples_per_frame: header.samples_per_frame,
            frames: frame_count,
        })
    }
}

/// Delete `path` if present; absence is not an error.
fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TranscodeError::io(path, e)),
    }
}
