//! Codec session: one Opus encoder and one Opus decoder bound to a fixed
//! stream format and frame size.
//!
//! - Encode: interleaved i16 frame → Opus packet
//! - Decode: Opus packet → interleaved i16 frame of exactly the expected size

use super::format::{ApplicationProfile, StreamFormat};
use super::frame_size;
use crate::error::CodecError;

/// Room for one maximal Opus frame (1275 bytes) plus slack.
const MIN_PACKET_CAPACITY: usize = 1500;

/// Encodes and decodes single codec frames.
pub trait FrameCodec: Send {
    /// Encode exactly one frame of interleaved samples.
    fn encode_frame(&mut self, pcm: &[i16]) -> Result<Vec<u8>, CodecError>;

    /// Decode one packet that must yield `expected_samples` samples per channel.
    fn decode_frame(&mut self, payload: &[u8], expected_samples: u32)
    -> Result<Vec<i16>, CodecError>;
}

/// Creates codec sessions. One session per transcode run; never shared.
pub trait CodecBackend: Send + Sync {
    type Session: FrameCodec;

    fn open(
        &self,
        format: &StreamFormat,
        samples_per_frame: u32,
        profile: ApplicationProfile,
    ) -> Result<Self::Session, CodecError>;
}

// ======================== Opus backend ========================

#[derive(Debug, Clone, Copy, Default)]
pub struct OpusBackend {
    /// Encoder bitrate in bits/s; engine default when unset
    pub bitrate: Option<i32>,
}

impl OpusBackend {
    pub fn new(bitrate: Option<i32>) -> Self {
        Self { bitrate }
    }
}

impl CodecBackend for OpusBackend {
    type Session = OpusSession;

    fn open(
        &self,
        format: &StreamFormat,
        samples_per_frame: u32,
        profile: ApplicationProfile,
    ) -> Result<OpusSession, CodecError> {
        OpusSession::open(format, samples_per_frame, profile, self.bitrate)
    }
}

pub struct OpusSession {
    encoder: opus::Encoder,
    decoder: opus::Decoder,
    format: StreamFormat,
    samples_per_frame: u32,
    packet: Vec<u8>,
    pcm: Vec<i16>,
}

impl OpusSession {
    /// Create the encoder/decoder pair.
    ///
    /// * `format`            - Stream layout; Opus accepts 8/12/16/24/48 kHz, 1 or 2 channels
    /// * `samples_per_frame` - Frame size from the frame sizer
    /// * `profile`           - Application hint for the encoder
    /// * `bitrate`           - Optional bitrate in bits/s
    pub fn open(
        format: &StreamFormat,
        samples_per_frame: u32,
        profile: ApplicationProfile,
        bitrate: Option<i32>,
    ) -> Result<Self, CodecError> {
        let init_err = |reason: String| CodecError::Init {
            sample_rate: format.sample_rate,
            channels: format.channels,
            reason,
        };

        let channels = match format.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => return Err(init_err(format!("{n} channels unsupported"))),
        };
        if frame_size::multiple_for(format.sample_rate, samples_per_frame).is_none() {
            return Err(init_err(format!(
                "{samples_per_frame} samples is not a frame duration the codec accepts"
            )));
        }

        let mut encoder = opus::Encoder::new(format.sample_rate, channels, profile.to_opus())
            .map_err(|e| init_err(e.to_string()))?;
        if let Some(bits) = bitrate {
            encoder
                .set_bitrate(opus::Bitrate::Bits(bits))
                .map_err(|e| init_err(e.to_string()))?;
        }
        let decoder =
            opus::Decoder::new(format.sample_rate, channels).map_err(|e| init_err(e.to_string()))?;

        // Raw PCM size is the ceiling that is ever worth spending on a packet
        let pcm_bytes = samples_per_frame as usize * format.channels as usize * 2;
        let capacity = pcm_bytes.clamp(MIN_PACKET_CAPACITY, u16::MAX as usize);

        log::debug!(
            "codec session opened: {}Hz/{}ch, {} samples/frame, {:?}",
            format.sample_rate,
            format.channels,
            samples_per_frame,
            profile
        );

        Ok(Self {
            encoder,
            decoder,
            format: *format,
            samples_per_frame,
            packet: vec![0u8; capacity],
            pcm: Vec::with_capacity(samples_per_frame as usize * format.channels as usize),
        })
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn samples_per_frame(&self) -> u32 {
        self.samples_per_frame
    }

    /// Total number of interleaved i16 samples per frame.
    pub fn frame_samples(&self) -> usize {
        self.samples_per_frame as usize * self.format.channels as usize
    }

    /// Release both engine handles.
    pub fn close(self) {}
}

impl FrameCodec for OpusSession {
    fn encode_frame(&mut self, pcm: &[i16]) -> Result<Vec<u8>, CodecError> {
        let expected = self.frame_samples();
        if pcm.len() != expected {
            return Err(CodecError::FrameLength {
                expected,
                got: pcm.len(),
            });
        }

        let written = self
            .encoder
            .encode(pcm, &mut self.packet)
            .map_err(|e| CodecError::Encode {
                code: e.code() as i32,
            })?;
        if written == 0 {
            return Err(CodecError::Encode { code: 0 });
        }
        Ok(self.packet[..written].to_vec())
    }

    fn decode_frame(
        &mut self,
        payload: &[u8],
        expected_samples: u32,
    ) -> Result<Vec<i16>, CodecError> {
        let channels = self.format.channels as usize;
        self.pcm.clear();
        self.pcm.resize(expected_samples as usize * channels, 0);

        let decoded = self
            .decoder
            .decode(payload, &mut self.pcm, false)
            .map_err(|e| CodecError::Decode {
                code: e.code() as i32,
            })?;
        if decoded != expected_samples as usize {
            return Err(CodecError::SampleCount {
                expected: expected_samples,
                got: decoded,
            });
        }
        Ok(self.pcm[..decoded * channels].to_vec())
    }
}

impl Drop for OpusSession {
    fn drop(&mut self) {
        log::debug!(
            "codec session closed: {}Hz/{}ch",
            self.format.sample_rate,
            self.format.channels
        );
    }
}
