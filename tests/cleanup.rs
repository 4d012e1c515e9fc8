//! Every resource a run acquires is released exactly once, whichever step fails.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use opuspack::audio::container::ContainerReader;
use opuspack::audio::{
    AudioIo, CodecBackend, FrameCodec, PcmSink, PcmSource, spawn_decode, spawn_encode,
};
use opuspack::{
    ApplicationProfile, CodecError, DecodeJob, EncodeJob, Result, StreamFormat, TranscodeError,
    TranscodeReport, Transcoder,
};

#[derive(Default)]
struct Counts {
    opened: AtomicUsize,
    dropped: AtomicUsize,
}

impl Counts {
    fn open(self: &Arc<Self>) -> Arc<Self> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Arc::clone(self)
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn assert_released(&self, expected_opens: usize) {
        assert_eq!(self.opened(), expected_opens, "open count");
        assert_eq!(self.dropped(), expected_opens, "drop count");
    }
}

fn mock_io_error(path: &Path) -> TranscodeError {
    TranscodeError::io(path, io::Error::new(io::ErrorKind::NotFound, "mock"))
}

// ======================== Audio file mock ========================

#[derive(Clone)]
struct MockIo {
    format: StreamFormat,
    frames: u64,
    /// Frames the source really holds when fewer than it reports
    held: Option<u64>,
    fail_read_open: bool,
    fail_write_open: bool,
    sources: Arc<Counts>,
    sinks: Arc<Counts>,
}

impl MockIo {
    fn new(frames: u64) -> Self {
        Self {
            format: StreamFormat::pcm(16000, 16, 1).unwrap(),
            frames,
            held: None,
            fail_read_open: false,
            fail_write_open: false,
            sources: Arc::default(),
            sinks: Arc::default(),
        }
    }
}

struct MockSource {
    format: StreamFormat,
    total: u64,
    left: u64,
    counts: Arc<Counts>,
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.counts.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl PcmSource for MockSource {
    fn file_format(&self) -> StreamFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        self.total
    }

    fn set_client_format(&mut self, format: StreamFormat) -> Result<()> {
        self.format = format;
        Ok(())
    }

    fn read_frames(&mut self, frames: usize, out: &mut Vec<i16>) -> Result<usize> {
        let n = (frames as u64).min(self.left) as usize;
        self.left -= n as u64;
        out.clear();
        out.resize(n * self.format.channels as usize, 7);
        Ok(n)
    }
}

struct MockSink {
    counts: Arc<Counts>,
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.counts.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl PcmSink for MockSink {
    fn set_client_format(&mut self, _format: StreamFormat) -> Result<()> {
        Ok(())
    }

    fn write_frames(&mut self, _samples: &[i16]) -> Result<()> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl AudioIo for MockIo {
    fn open_read(&self, path: &Path) -> Result<Box<dyn PcmSource>> {
        if self.fail_read_open {
            return Err(mock_io_error(path));
        }
        Ok(Box::new(MockSource {
            format: self.format,
            total: self.frames,
            left: self.held.unwrap_or(self.frames),
            counts: self.sources.open(),
        }))
    }

    fn open_write(&self, path: &Path, _format: StreamFormat) -> Result<Box<dyn PcmSink>> {
        if self.fail_write_open {
            return Err(mock_io_error(path));
        }
        Ok(Box::new(MockSink {
            counts: self.sinks.open(),
        }))
    }
}

// ======================== Codec mock ========================

#[derive(Clone, Default)]
struct MockCodec {
    fail_init: bool,
    fail_encode_at: Option<usize>,
    fail_decode_at: Option<usize>,
    sessions: Arc<Counts>,
}

struct MockSession {
    channels: usize,
    encoded: usize,
    decoded: usize,
    fail_encode_at: Option<usize>,
    fail_decode_at: Option<usize>,
    counts: Arc<Counts>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.counts.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl FrameCodec for MockSession {
    fn encode_frame(&mut self, _pcm: &[i16]) -> std::result::Result<Vec<u8>, CodecError> {
        let index = self.encoded;
        self.encoded += 1;
        if self.fail_encode_at == Some(index) {
            return Err(CodecError::Encode { code: -3 });
        }
        Ok(vec![0xfc, index as u8, 0x01])
    }

    fn decode_frame(
        &mut self,
        _payload: &[u8],
        expected_samples: u32,
    ) -> std::result::Result<Vec<i16>, CodecError> {
        let index = self.decoded;
        self.decoded += 1;
        if self.fail_decode_at == Some(index) {
            return Err(CodecError::Decode { code: -4 });
        }
        Ok(vec![0; expected_samples as usize * self.channels])
    }
}

impl CodecBackend for MockCodec {
    type Session = MockSession;

    fn open(
        &self,
        format: &StreamFormat,
        _samples_per_frame: u32,
        _profile: ApplicationProfile,
    ) -> std::result::Result<MockSession, CodecError> {
        if self.fail_init {
            return Err(CodecError::Init {
                sample_rate: format.sample_rate,
                channels: format.channels,
                reason: "mock".into(),
            });
        }
        Ok(MockSession {
            channels: format.channels as usize,
            encoded: 0,
            decoded: 0,
            fail_encode_at: self.fail_encode_at,
            fail_decode_at: self.fail_decode_at,
            counts: self.sessions.open(),
        })
    }
}

// ======================== Helpers ========================

const FRAMES: u64 = 10 * 960;

struct Paths {
    _dir: tempfile::TempDir,
    source: PathBuf,
    container: PathBuf,
    output: PathBuf,
}

fn paths() -> Paths {
    let dir = tempfile::tempdir().unwrap();
    Paths {
        source: dir.path().join("in.wav"),
        container: dir.path().join("in.opk"),
        output: dir.path().join("out.wav"),
        _dir: dir,
    }
}

/// A ten-record container written through the mocks.
fn encoded(p: &Paths) {
    let t = Transcoder::new(MockIo::new(FRAMES), MockCodec::default());
    let report = t.encode(&EncodeJob::new(&p.source, &p.container), |_| {}).unwrap();
    assert_eq!(report.frames, 10);
}

// ======================== Encode ========================

#[test]
fn successful_encode_releases_everything_once() {
    let p = paths();
    let io = MockIo::new(FRAMES);
    let codec = MockCodec::default();
    let t = Transcoder::new(io.clone(), codec.clone());

    t.encode(&EncodeJob::new(&p.source, &p.container), |_| {}).unwrap();
    io.sources.assert_released(1);
    codec.sessions.assert_released(1);
}

#[test]
fn source_open_failure_acquires_nothing() {
    let p = paths();
    let mut io = MockIo::new(FRAMES);
    io.fail_read_open = true;
    let codec = MockCodec::default();
    let t = Transcoder::new(io.clone(), codec.clone());

    let err = t
        .encode(&EncodeJob::new(&p.source, &p.container), |_| {})
        .unwrap_err();
    assert!(matches!(err, TranscodeError::Io { .. }));
    io.sources.assert_released(0);
    codec.sessions.assert_released(0);
    assert!(!p.container.exists());
}

#[test]
fn codec_init_failure_releases_source() {
    let p = paths();
    let io = MockIo::new(FRAMES);
    let codec = MockCodec {
        fail_init: true,
        ..Default::default()
    };
    let t = Transcoder::new(io.clone(), codec.clone());

    let err = t
        .encode(&EncodeJob::new(&p.source, &p.container), |_| {})
        .unwrap_err();
    assert!(matches!(err, TranscodeError::Codec(CodecError::Init { .. })));
    io.sources.assert_released(1);
    codec.sessions.assert_released(0);
    assert!(!p.container.exists());
}

#[test]
fn encode_failure_at_any_frame_releases_once() {
    for at in [0, 5, 9] {
        let p = paths();
        let io = MockIo::new(FRAMES);
        let codec = MockCodec {
            fail_encode_at: Some(at),
            ..Default::default()
        };
        let t = Transcoder::new(io.clone(), codec.clone());

        let mut calls = 0;
        let err = t
            .encode(&EncodeJob::new(&p.source, &p.container), |_| calls += 1)
            .unwrap_err();
        assert!(
            matches!(err, TranscodeError::Codec(CodecError::Encode { code: -3 })),
            "frame {at}: {err:?}"
        );
        // Progress is reported before each frame is encoded, never 1.0 on failure
        assert_eq!(calls, at + 1);
        io.sources.assert_released(1);
        codec.sessions.assert_released(1);
    }
}

#[test]
fn source_running_short_still_succeeds() {
    let p = paths();
    let mut io = MockIo::new(FRAMES);
    io.held = Some(7 * 960 + 100);
    let codec = MockCodec::default();
    let t = Transcoder::new(io.clone(), codec.clone());

    let mut seen = Vec::new();
    let report = t
        .encode(&EncodeJob::new(&p.source, &p.container), |f| seen.push(f))
        .unwrap();
    assert_eq!(report.frames, 7);
    // One report per encoded frame, then 1.0
    assert_eq!(seen.len(), 7 + 1);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&1.0));
    io.sources.assert_released(1);
    codec.sessions.assert_released(1);

    let reader = ContainerReader::open(BufReader::new(File::open(&p.container).unwrap())).unwrap();
    assert_eq!(reader.header().frame_count, 7);

    let decoder = MockCodec::default();
    let report = Transcoder::new(MockIo::new(0), decoder.clone())
        .decode(&DecodeJob::new(&p.container, &p.output), |_| {})
        .unwrap();
    assert_eq!(report.frames, 7);
    decoder.sessions.assert_released(1);
}

// ======================== Decode ========================

#[test]
fn decode_failure_at_any_frame_releases_once() {
    for at in [0, 4, 9] {
        let p = paths();
        encoded(&p);

        let io = MockIo::new(0);
        let codec = MockCodec {
            fail_decode_at: Some(at),
            ..Default::default()
        };
        let t = Transcoder::new(io.clone(), codec.clone());

        let err = t
            .decode(&DecodeJob::new(&p.container, &p.output), |_| {})
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Codec(CodecError::Decode { .. })));
        io.sinks.assert_released(1);
        codec.sessions.assert_released(1);
    }
}

#[test]
fn sink_open_failure_never_opens_codec() {
    let p = paths();
    encoded(&p);

    let mut io = MockIo::new(0);
    io.fail_write_open = true;
    let codec = MockCodec::default();
    let t = Transcoder::new(io.clone(), codec.clone());

    assert!(
        t.decode(&DecodeJob::new(&p.container, &p.output), |_| {})
            .is_err()
    );
    io.sinks.assert_released(0);
    codec.sessions.assert_released(0);
}

#[test]
fn successful_decode_releases_everything_once() {
    let p = paths();
    encoded(&p);

    let io = MockIo::new(0);
    let codec = MockCodec::default();
    let t = Transcoder::new(io.clone(), codec.clone());
    let report = t
        .decode(&DecodeJob::new(&p.container, &p.output), |_| {})
        .unwrap();
    assert_eq!(report.frames, 10);
    io.sinks.assert_released(1);
    codec.sessions.assert_released(1);
}

// ======================== Background runs ========================

#[test]
fn background_encode_completes_once_with_the_failure() {
    let p = paths();
    let io = MockIo::new(FRAMES);
    let codec = MockCodec {
        fail_encode_at: Some(3),
        ..Default::default()
    };
    let t = Transcoder::new(io.clone(), codec.clone());
    let (tx, rx) = mpsc::channel::<Result<TranscodeReport>>();

    let handle = spawn_encode(
        t,
        EncodeJob::new(&p.source, &p.container),
        |_| {},
        move |outcome| tx.send(outcome).unwrap(),
    );
    handle.join();

    let outcomes: Vec<_> = rx.try_iter().collect();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        Err(TranscodeError::Codec(CodecError::Encode { .. }))
    ));
    io.sources.assert_released(1);
    codec.sessions.assert_released(1);
}

#[test]
fn background_decode_reports_progress_then_completion() {
    let p = paths();
    encoded(&p);

    let t = Transcoder::new(MockIo::new(0), MockCodec::default());
    let (tx, rx) = mpsc::channel::<std::result::Result<f32, bool>>();
    let progress_tx = tx.clone();

    let handle = spawn_decode(
        t,
        DecodeJob::new(&p.container, &p.output),
        move |f| progress_tx.send(Ok(f)).unwrap(),
        move |outcome| tx.send(Err(outcome.is_ok())).unwrap(),
    );
    handle.join();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 12);
    assert_eq!(events[10], Ok(1.0));
    assert_eq!(events[11], Err(true));
}
