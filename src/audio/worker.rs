//! Runs transcode jobs off the caller's thread.
//!
//! Each run gets a dedicated OS thread (or a tokio blocking task), owns its
//! codec session and file handles exclusively, and reports back through a
//! progress callback followed by exactly one completion call.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::opus_codec::CodecBackend;
use super::pcm_io::AudioIo;
use super::transcode::{DecodeJob, EncodeJob, TranscodeReport, Transcoder};
use crate::error::{Result, TranscodeError};

/// Handle to a run started with [`spawn_encode`] or [`spawn_decode`].
pub struct TranscodeHandle {
    thread: Option<JoinHandle<()>>,
}

impl TranscodeHandle {
    /// Wait for the run (and its completion callback) to finish.
    pub fn join(mut self) {
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|h| h.is_finished())
    }
}

/// Encode on a background thread.
///
/// `progress` is called from the worker thread once per frame and once with
/// `1.0` on success; `complete` is called exactly once, after the last progress call.
pub fn spawn_encode<I, C, P, F>(
    transcoder: Transcoder<I, C>,
    job: EncodeJob,
    progress: P,
    complete: F,
) -> TranscodeHandle
where
    I: AudioIo + 'static,
    C: CodecBackend + 'static,
    P: FnMut(f32) + Send + 'static,
    F: FnOnce(Result<TranscodeReport>) + Send + 'static,
{
    spawn_run("opus-encode", complete, move || transcoder.encode(&job, progress))
}

/// Decode on a background thread. Same callback contract as [`spawn_encode`].
pub fn spawn_decode<I, C, P, F>(
    transcoder: Transcoder<I, C>,
    job: DecodeJob,
    progress: P,
    complete: F,
) -> TranscodeHandle
where
    I: AudioIo + 'static,
    C: CodecBackend + 'static,
    P: FnMut(f32) + Send + 'static,
    F: FnOnce(Result<TranscodeReport>) + Send + 'static,
{
    spawn_run("opus-decode", complete, move || transcoder.decode(&job, progress))
}

/// Encode on tokio's blocking pool.
pub async fn encode_async<I, C, P>(
    transcoder: Transcoder<I, C>,
    job: EncodeJob,
    progress: P,
) -> Result<TranscodeReport>
where
    I: AudioIo + 'static,
    C: CodecBackend + 'static,
    P: FnMut(f32) + Send + 'static,
{
    tokio::task::spawn_blocking(move || transcoder.encode(&job, progress))
        .await
        .unwrap_or_else(|e| Err(join_error(e)))
}

/// Decode on tokio's blocking pool.
pub async fn decode_async<I, C, P>(
    transcoder: Transcoder<I, C>,
    job: DecodeJob,
    progress: P,
) -> Result<TranscodeReport>
where
    I: AudioIo + 'static,
    C: CodecBackend + 'static,
    P: FnMut(f32) + Send + 'static,
{
    tokio::task::spawn_blocking(move || transcoder.decode(&job, progress))
        .await
        .unwrap_or_else(|e| Err(join_error(e)))
}

fn spawn_run<R, F>(name: &str, complete: F, run: R) -> TranscodeHandle
where
    R: FnOnce() -> Result<TranscodeReport> + Send + 'static,
    F: FnOnce(Result<TranscodeReport>) + Send + 'static,
{
    // Shared so a failed spawn can still deliver the completion
    let slot = Arc::new(Mutex::new(Some(complete)));
    let worker_slot = Arc::clone(&slot);

    let spawned = thread::Builder::new().name(name.into()).spawn(move || {
        let outcome = guarded(run);
        if let Err(e) = &outcome {
            log::error!("{} failed: {}", thread_name(), e);
        }
        if let Some(done) = take(&worker_slot) {
            done(outcome);
        }
    });

    match spawned {
        Ok(handle) => TranscodeHandle {
            thread: Some(handle),
        },
        Err(e) => {
            log::error!("Failed to spawn {} thread: {}", name, e);
            if let Some(done) = take(&slot) {
                done(Err(TranscodeError::Spawn(e)));
            }
            TranscodeHandle { thread: None }
        }
    }
}

fn take<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    slot.lock().unwrap_or_else(|p| p.into_inner()).take()
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("transcode").to_string()
}

fn guarded<R>(run: R) -> Result<TranscodeReport>
where
    R: FnOnce() -> Result<TranscodeReport>,
{
    panic::catch_unwind(AssertUnwindSafe(run))
        .unwrap_or_else(|payload| Err(TranscodeError::Panicked(panic_message(&*payload))))
}

fn join_error(e: tokio::task::JoinError) -> TranscodeError {
    if e.is_panic() {
        TranscodeError::Panicked(panic_message(&*e.into_panic()))
    } else {
        TranscodeError::Panicked("worker task was cancelled".into())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
