//! Opus container: fixed header followed by length-prefixed frame records.
//!
//! Layout (all little-endian):
//!
//! ```text
//! 0..3    magic "OPK"
//! 3       format version (2)
//! 4..44   stream descriptor
//!           f64 sample rate, u32 format id ('lpcm'), u32 format flags,
//!           u32 bytes/packet, u32 frames/packet, u32 bytes/frame,
//!           u32 channels/frame, u32 bits/channel, u32 reserved
//! 44..52  i64 frame count
//! 52..56  u32 samples per frame
//! 56..    records: u16 payload length + payload
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use super::format::StreamFormat;
use super::frame_size;
use crate::error::ContainerError;

pub const MAGIC: [u8; 3] = *b"OPK";
pub const FORMAT_VERSION: u8 = 2;
pub const DESCRIPTOR_LEN: usize = 40;
pub const HEADER_LEN: usize = 4 + DESCRIPTOR_LEN + 8 + 4;
pub const RECORD_PREFIX_LEN: usize = 2;
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// Linear PCM format id, `'lpcm'`.
const FORMAT_ID_LPCM: u32 = u32::from_be_bytes(*b"lpcm");
/// Signed integer | packed.
const FORMAT_FLAGS_PCM: u32 = 0x4 | 0x8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub format: StreamFormat,
    /// Number of records that follow the header
    pub frame_count: i64,
    /// Codec frame size, constant for the whole file
    pub samples_per_frame: u32,
}

impl ContainerHeader {
    pub fn new(format: StreamFormat, frame_count: i64, samples_per_frame: u32) -> Self {
        Self {
            format,
            frame_count,
            samples_per_frame,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut i = 0usize;

        fn put(out: &mut [u8], i: &mut usize, b: &[u8]) {
            out[*i..*i + b.len()].copy_from_slice(b);
            *i += b.len();
        }

        let f = &self.format;
        let bytes_per_frame = f.bytes_per_frame();

        put(&mut out, &mut i, &MAGIC);
        put(&mut out, &mut i, &[FORMAT_VERSION]);
        put(&mut out, &mut i, &(f.sample_rate as f64).to_le_bytes());
        put(&mut out, &mut i, &FORMAT_ID_LPCM.to_le_bytes());
        put(&mut out, &mut i, &FORMAT_FLAGS_PCM.to_le_bytes());
        put(&mut out, &mut i, &bytes_per_frame.to_le_bytes()); // bytes/packet
        put(&mut out, &mut i, &1u32.to_le_bytes()); // frames/packet
        put(&mut out, &mut i, &bytes_per_frame.to_le_bytes());
        put(&mut out, &mut i, &(f.channels as u32).to_le_bytes());
        put(&mut out, &mut i, &(f.bit_depth as u32).to_le_bytes());
        put(&mut out, &mut i, &0u32.to_le_bytes()); // reserved
        put(&mut out, &mut i, &self.frame_count.to_le_bytes());
        put(&mut out, &mut i, &self.samples_per_frame.to_le_bytes());

        debug_assert_eq!(i, HEADER_LEN);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ContainerError> {
        if buf.len() < HEADER_LEN {
            return Err(ContainerError::TruncatedHeader {
                have: buf.len(),
                need: HEADER_LEN,
            });
        }

        let mut i = 0usize;
        fn take<const N: usize>(buf: &[u8], i: &mut usize) -> [u8; N] {
            let mut dst = [0u8; N];
            dst.copy_from_slice(&buf[*i..*i + N]);
            *i += N;
            dst
        }
        let u32_at = |i: &mut usize| u32::from_le_bytes(take::<4>(buf, i));

        let magic = take::<3>(buf, &mut i);
        if magic != MAGIC {
            return Err(malformed(format!("bad magic {magic:02x?}")));
        }
        let version = take::<1>(buf, &mut i)[0];
        if version != FORMAT_VERSION {
            return Err(malformed(format!("unsupported format version {version}")));
        }

        let sample_rate = f64::from_le_bytes(take::<8>(buf, &mut i));
        let format_id = u32_at(&mut i);
        let _format_flags = u32_at(&mut i);
        let bytes_per_packet = u32_at(&mut i);
        let frames_per_packet = u32_at(&mut i);
        let bytes_per_frame = u32_at(&mut i);
        let channels = u32_at(&mut i);
        let bits = u32_at(&mut i);
        let _reserved = u32_at(&mut i);
        let frame_count = i64::from_le_bytes(take::<8>(buf, &mut i));
        let samples_per_frame = u32_at(&mut i);
        debug_assert_eq!(i, HEADER_LEN);

        if format_id != FORMAT_ID_LPCM {
            return Err(malformed(format!("format id {format_id:#010x} is not linear PCM")));
        }
        if !(sample_rate.is_finite()
            && sample_rate > 0.0
            && sample_rate.fract() == 0.0
            && sample_rate <= u32::MAX as f64)
        {
            return Err(malformed(format!("invalid sample rate {sample_rate}")));
        }
        let channels = u16::try_from(channels)
            .map_err(|_| malformed(format!("invalid channel count {channels}")))?;
        let bit_depth =
            u16::try_from(bits).map_err(|_| malformed(format!("invalid bit depth {bits}")))?;
        let format = StreamFormat::new(sample_rate as u32, channels, bit_depth)
            .map_err(|e| malformed(e.to_string()))?;

        if bytes_per_frame != format.bytes_per_frame()
            || frames_per_packet != 1
            || bytes_per_packet != bytes_per_frame
        {
            return Err(malformed(format!(
                "inconsistent packing: {bytes_per_frame} bytes/frame, \
                 {frames_per_packet} frames/packet, {bytes_per_packet} bytes/packet"
            )));
        }
        if frame_count < 0 {
            return Err(malformed(format!("negative frame count {frame_count}")));
        }
        if frame_size::multiple_for(format.sample_rate, samples_per_frame).is_none() {
            return Err(malformed(format!(
                "{samples_per_frame} samples per frame is not a codec frame at {} Hz",
                format.sample_rate
            )));
        }

        Ok(Self {
            format,
            frame_count,
            samples_per_frame,
        })
    }
}

fn malformed(reason: String) -> ContainerError {
    ContainerError::MalformedHeader(reason)
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ======================== Writer ========================

/// Writes a header and then one record per encoded frame.
pub struct ContainerWriter<W: Write + Seek> {
    inner: W,
    header: ContainerHeader,
    records: i64,
}

impl<W: Write + Seek> ContainerWriter<W> {
    pub fn new(mut inner: W, header: ContainerHeader) -> Result<Self, ContainerError> {
        inner.write_all(&header.encode())?;
        Ok(Self {
            inner,
            header,
            records: 0,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn write_record(&mut self, payload: &[u8]) -> Result<(), ContainerError> {
        if payload.is_empty() {
            return Err(ContainerError::EmptyRecord {
                index: self.records as u64,
            });
        }
        let len = u16::try_from(payload.len())
            .map_err(|_| ContainerError::RecordTooLarge { len: payload.len() })?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(payload)?;
        self.records += 1;
        Ok(())
    }

    pub fn records_written(&self) -> i64 {
        self.records
    }

    /// Flush, correcting the header's frame count if the stream ran short.
    pub fn finish(mut self) -> Result<W, ContainerError> {
        if self.records != self.header.frame_count {
            log::warn!(
                "container holds {} records, header announced {}; rewriting header",
                self.records,
                self.header.frame_count
            );
            self.header.frame_count = self.records;
            self.inner.seek(SeekFrom::Start(0))?;
            self.inner.write_all(&self.header.encode())?;
            self.inner.seek(SeekFrom::End(0))?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

// ======================== Reader ========================

/// Reads the header, then hands out records in file order.
pub struct ContainerReader<R: Read> {
    inner: R,
    header: ContainerHeader,
    next_index: u64,
}

impl<R: Read> ContainerReader<R> {
    pub fn open(mut inner: R) -> Result<Self, ContainerError> {
        let mut buf = [0u8; HEADER_LEN];
        let have = read_full(&mut inner, &mut buf)?;
        let header = ContainerHeader::decode(&buf[..have])?;
        Ok(Self {
            inner,
            header,
            next_index: 0,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Records left according to the header.
    pub fn remaining(&self) -> u64 {
        (self.header.frame_count as u64).saturating_sub(self.next_index)
    }

    /// Read the next record's payload into `payload`.
    pub fn read_record(&mut self, payload: &mut Vec<u8>) -> Result<(), ContainerError> {
        let index = self.next_index;
        if self.remaining() == 0 {
            return Err(ContainerError::TruncatedFrame {
                index,
                expected: 0,
                got: 0,
            });
        }

        let mut prefix = [0u8; RECORD_PREFIX_LEN];
        let got = read_full(&mut self.inner, &mut prefix)?;
        if got < RECORD_PREFIX_LEN {
            return Err(ContainerError::TruncatedFrame {
                index,
                expected: RECORD_PREFIX_LEN,
                got,
            });
        }
        let len = u16::from_le_bytes(prefix) as usize;
        if len == 0 {
            return Err(ContainerError::EmptyRecord { index });
        }

        payload.clear();
        payload.resize(len, 0);
        let got = read_full(&mut self.inner, payload)?;
        if got < len {
            payload.truncate(got);
            return Err(ContainerError::TruncatedFrame {
                index,
                expected: len,
                got,
            });
        }

        self.next_index += 1;
        Ok(())
    }
}
