//! PCM conversion between stream formats: channel mapping, rate conversion
//! and bit-depth scaling.
//!
//! - Channels: N → mono averages, equal counts pass through, anything else
//!   wraps channel indices (mono → stereo duplicates).
//! - Rate: streaming linear interpolation. Positions are tracked as exact
//!   fractions of the output rate so long streams do not drift.

use super::format::StreamFormat;

/// Scale an integer sample of `bits` width to 16 bits.
pub fn sample_to_i16(sample: i32, bits: u16) -> i16 {
    if bits >= 16 {
        (sample >> (bits - 16)) as i16
    } else {
        (sample << (16 - bits)) as i16
    }
}

/// Scale a 16-bit sample to an integer sample of `bits` width.
pub fn sample_from_i16(sample: i16, bits: u16) -> i32 {
    if bits >= 16 {
        (sample as i32) << (bits - 16)
    } else {
        (sample as i32) >> (16 - bits)
    }
}

/// Converts interleaved 16-bit PCM from one layout to another.
pub struct FormatConverter {
    from: StreamFormat,
    to: StreamFormat,
    resampler: Option<LinearResampler>,
    mixed: Vec<i16>,
}

impl FormatConverter {
    pub fn new(from: StreamFormat, to: StreamFormat) -> Self {
        let resampler = (from.sample_rate != to.sample_rate).then(|| {
            LinearResampler::new(from.sample_rate, to.sample_rate, to.channels as usize)
        });
        Self {
            from,
            to,
            resampler,
            mixed: Vec::new(),
        }
    }

    pub fn from_format(&self) -> StreamFormat {
        self.from
    }

    pub fn to_format(&self) -> StreamFormat {
        self.to
    }

    /// Convert one chunk of whole frames, appending to `out`.
    pub fn push(&mut self, input: &[i16], out: &mut Vec<i16>) {
        self.process(input, out, false);
    }

    /// Drain samples held back by the resampler at end of stream.
    pub fn flush(&mut self, out: &mut Vec<i16>) {
        self.process(&[], out, true);
    }

    fn process(&mut self, input: &[i16], out: &mut Vec<i16>, last: bool) {
        let in_ch = self.from.channels as usize;
        let out_ch = self.to.channels as usize;
        let frames = input.len() / in_ch;

        self.mixed.clear();
        convert_channels(&input[..frames * in_ch], in_ch, out_ch, &mut self.mixed);

        match self.resampler.as_mut() {
            Some(r) => r.process(&self.mixed, out, last),
            None => out.extend_from_slice(&self.mixed),
        }
    }
}

/// Map interleaved frames from `in_ch` to `out_ch` channels.
fn convert_channels(input: &[i16], in_ch: usize, out_ch: usize, out: &mut Vec<i16>) {
    let frames = input.len() / in_ch;
    if in_ch == out_ch {
        out.extend_from_slice(input);
    } else if out_ch == 1 {
        // Multi-channel → mono: average all channels
        for frame in input.chunks_exact(in_ch) {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / in_ch as i32) as i16);
        }
    } else {
        // Upmix / general channel mapping (e.g., mono → stereo: duplicate)
        out.reserve(frames * out_ch);
        for frame in input.chunks_exact(in_ch) {
            for c in 0..out_ch {
                out.push(frame[c % in_ch]);
            }
        }
    }
}

/// Streaming linear-interpolation resampler over interleaved frames.
struct LinearResampler {
    in_rate: u64,
    out_rate: u64,
    channels: usize,
    pending: Vec<i16>,
    /// Read position relative to `pending[0]`, in units of 1/out_rate input frames
    pos: u64,
}

impl LinearResampler {
    fn new(in_rate: u32, out_rate: u32, channels: usize) -> Self {
        Self {
            in_rate: in_rate as u64,
            out_rate: out_rate as u64,
            channels,
            pending: Vec::new(),
            pos: 0,
        }
    }

    fn process(&mut self, input: &[i16], out: &mut Vec<i16>, last: bool) {
        let ch = self.channels;
        self.pending.extend_from_slice(input);
        let frames = self.pending.len() / ch;

        loop {
            let idx = (self.pos / self.out_rate) as usize;
            let frac = (self.pos % self.out_rate) as i64;
            if idx + 1 < frames {
                let a = &self.pending[idx * ch..(idx + 1) * ch];
                let b = &self.pending[(idx + 1) * ch..(idx + 2) * ch];
                for c in 0..ch {
                    let (a, b) = (a[c] as i64, b[c] as i64);
                    out.push((a + (b - a) * frac / self.out_rate as i64) as i16);
                }
            } else if last && idx < frames {
                out.extend_from_slice(&self.pending[idx * ch..(idx + 1) * ch]);
            } else {
                break;
            }
            self.pos += self.in_rate;
        }

        let consumed = ((self.pos / self.out_rate) as usize).min(frames);
        self.pending.drain(..consumed * ch);
        self.pos -= consumed as u64 * self.out_rate;
    }
}
