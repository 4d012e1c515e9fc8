//! WAV-backed [`AudioIo`] built on `hound`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::convert::{FormatConverter, sample_from_i16, sample_to_i16};
use super::format::StreamFormat;
use super::pcm_io::{AudioIo, PcmSink, PcmSource};
use crate::error::{Result, TranscodeError};

/// Frames pulled from the file per refill.
const READ_CHUNK_FRAMES: usize = 4096;

/// Integer PCM WAV files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavIo;

impl AudioIo for WavIo {
    fn open_read(&self, path: &Path) -> Result<Box<dyn PcmSource>> {
        Ok(Box::new(WavSource::open(path)?))
    }

    fn open_write(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn PcmSink>> {
        Ok(Box::new(WavSink::create(path, format)?))
    }
}

impl StreamFormat {
    pub fn to_wav_spec(&self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bit_depth,
            sample_format: SampleFormat::Int,
        }
    }
}

fn with_path(path: &Path, err: hound::Error) -> TranscodeError {
    match err {
        hound::Error::IoError(e) => TranscodeError::io(path, e),
        other => other.into(),
    }
}

// ======================== Reader ========================

pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    file_format: StreamFormat,
    total_frames: u64,
    converter: Option<FormatConverter>,
    /// Converted samples not yet handed out
    ready: Vec<i16>,
    raw: Vec<i16>,
    exhausted: bool,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path).map_err(|e| with_path(path, e))?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int {
            return Err(hound::Error::Unsupported.into());
        }
        let file_format = StreamFormat::new(spec.sample_rate, spec.channels, spec.bits_per_sample)?;
        let total_frames = reader.duration() as u64;

        log::debug!(
            "opened {} for reading: {:?}, {} frames",
            path.display(),
            file_format,
            total_frames
        );

        Ok(Self {
            reader,
            file_format,
            total_frames,
            converter: None,
            ready: Vec::new(),
            raw: Vec::new(),
            exhausted: false,
        })
    }

    fn client_channels(&self) -> usize {
        self.converter
            .as_ref()
            .map_or(self.file_format.channels, |c| c.to_format().channels) as usize
    }

    /// Refill `ready` until it holds `wanted` samples or the file ends.
    fn fill(&mut self, wanted: usize) -> Result<()> {
        let chunk = READ_CHUNK_FRAMES * self.file_format.channels as usize;
        let bits = self.file_format.bit_depth;

        while self.ready.len() < wanted && !self.exhausted {
            self.raw.clear();
            for sample in self.reader.samples::<i32>().take(chunk) {
                self.raw.push(sample_to_i16(sample?, bits));
            }
            if self.raw.len() < chunk {
                self.exhausted = true;
            }

            match self.converter.as_mut() {
                Some(conv) => {
                    conv.push(&self.raw, &mut self.ready);
                    if self.exhausted {
                        conv.flush(&mut self.ready);
                    }
                }
                None => self.ready.extend_from_slice(&self.raw),
            }
        }
        Ok(())
    }
}

impl PcmSource for WavSource {
    fn file_format(&self) -> StreamFormat {
        self.file_format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn set_client_format(&mut self, format: StreamFormat) -> Result<()> {
        format.validate()?;
        self.converter =
            (format != self.file_format).then(|| FormatConverter::new(self.file_format, format));
        Ok(())
    }

    fn read_frames(&mut self, frames: usize, out: &mut Vec<i16>) -> Result<usize> {
        out.clear();
        let channels = self.client_channels();
        self.fill(frames * channels)?;

        let take = (frames * channels).min(self.ready.len() / channels * channels);
        out.extend(self.ready.drain(..take));
        Ok(take / channels)
    }
}

// ======================== Writer ========================

pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    file_format: StreamFormat,
    converter: Option<FormatConverter>,
    converted: Vec<i16>,
}

impl WavSink {
    pub fn create(path: &Path, format: StreamFormat) -> Result<Self> {
        format.validate()?;
        let writer =
            WavWriter::create(path, format.to_wav_spec()).map_err(|e| with_path(path, e))?;
        log::debug!("opened {} for writing: {:?}", path.display(), format);
        Ok(Self {
            writer,
            file_format: format,
            converter: None,
            converted: Vec::new(),
        })
    }
}

fn write_samples(
    writer: &mut WavWriter<BufWriter<File>>,
    bits: u16,
    samples: &[i16],
) -> Result<()> {
    for &s in samples {
        writer.write_sample(sample_from_i16(s, bits))?;
    }
    Ok(())
}

impl PcmSink for WavSink {
    fn set_client_format(&mut self, format: StreamFormat) -> Result<()> {
        format.validate()?;
        self.converter =
            (format != self.file_format).then(|| FormatConverter::new(format, self.file_format));
        Ok(())
    }

    fn write_frames(&mut self, samples: &[i16]) -> Result<()> {
        let bits = self.file_format.bit_depth;
        match self.converter.as_mut() {
            Some(conv) => {
                self.converted.clear();
                conv.push(samples, &mut self.converted);
                write_samples(&mut self.writer, bits, &self.converted)
            }
            None => write_samples(&mut self.writer, bits, samples),
        }
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        if let Some(conv) = this.converter.as_mut() {
            let mut tail = Vec::new();
            conv.flush(&mut tail);
            write_samples(&mut this.writer, this.file_format.bit_depth, &tail)?;
        }
        this.writer.finalize()?;
        Ok(())
    }
}
