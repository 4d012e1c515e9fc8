//! audio - PCM file ↔ Opus container transcoding
//!
//! Reads integer PCM WAV files through `hound`, slices them into fixed
//! 2.5 ms-multiple frames, encodes each frame with Opus, and stores the
//! packets in a length-prefixed container (and back again).

pub mod container;
pub mod convert;
pub mod format;
pub mod frame_size;
pub mod opus_codec;
pub mod pcm_io;
pub mod transcode;
pub mod wav_file;
pub mod worker;

pub use container::{ContainerHeader, ContainerReader, ContainerWriter};
pub use format::{ApplicationProfile, StreamFormat};
pub use opus_codec::{CodecBackend, FrameCodec, OpusBackend, OpusSession};
pub use pcm_io::{AudioIo, PcmSink, PcmSource};
pub use transcode::{DecodeJob, EncodeJob, TranscodeReport, Transcoder};
pub use wav_file::WavIo;
pub use worker::{TranscodeHandle, decode_async, encode_async, spawn_decode, spawn_encode};
