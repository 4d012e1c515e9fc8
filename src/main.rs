use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

use opuspack::audio::{OpusBackend, TranscodeReport, Transcoder, WavIo, decode_async, encode_async};
use opuspack::config::Config;

const DEFAULT_CONFIG: &str = "opuspack.toml";

/// One line of output per finished job.
#[derive(Debug, Serialize)]
struct JobSummary {
    kind: &'static str,
    source: PathBuf,
    destination: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<TranscodeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JobSummary {
    fn new(
        kind: &'static str,
        source: PathBuf,
        destination: PathBuf,
        outcome: opuspack::Result<TranscodeReport>,
    ) -> Self {
        let (report, error) = match outcome {
            Ok(r) => (Some(r), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            kind,
            source,
            destination,
            report,
            error,
        }
    }
}

enum Phase {
    Finished { failures: usize },
    Interrupted,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;

    let transcoder = Transcoder::new(WavIo, OpusBackend::new(config.codec.bitrate));
    log::info!(
        "{} encode job(s), {} decode job(s)",
        config.encode.len(),
        config.decode.len()
    );

    // Encodes first so a decode may consume a container produced in the same run
    let mut jobs = JoinSet::new();
    for job in config.encode_jobs() {
        let transcoder = transcoder.clone();
        let progress = watch_progress(job.source.display().to_string());
        jobs.spawn(async move {
            let outcome = encode_async(transcoder, job.clone(), progress).await;
            JobSummary::new("encode", job.source, job.destination, outcome)
        });
    }
    let mut failures = match drain(&mut jobs).await? {
        Phase::Finished { failures } => failures,
        Phase::Interrupted => std::process::exit(130),
    };

    for job in config.decode.iter().cloned() {
        let transcoder = transcoder.clone();
        let progress = watch_progress(job.source.display().to_string());
        jobs.spawn(async move {
            let outcome = decode_async(transcoder, job.clone(), progress).await;
            JobSummary::new("decode", job.source, job.destination, outcome)
        });
    }
    failures += match drain(&mut jobs).await? {
        Phase::Finished { failures } => failures,
        Phase::Interrupted => std::process::exit(130),
    };

    if failures > 0 {
        anyhow::bail!("{failures} job(s) failed");
    }
    Ok(())
}

/// Progress callback feeding a watch channel, with a task logging every 10%.
fn watch_progress(name: String) -> impl FnMut(f32) + Send + 'static {
    let (tx, mut rx) = watch::channel(0.0f32);
    tokio::spawn(async move {
        let mut logged = -1i32;
        while rx.changed().await.is_ok() {
            let step = (*rx.borrow_and_update() * 10.0) as i32;
            if step > logged {
                logged = step;
                log::info!("{}: {}%", name, step * 10);
            }
        }
    });
    move |fraction| {
        let _ = tx.send(fraction);
    }
}

/// Print each job's summary as it finishes; Ctrl+C stops waiting.
async fn drain(jobs: &mut JoinSet<JobSummary>) -> anyhow::Result<Phase> {
    let mut failures = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::warn!("Received Ctrl+C, abandoning {} running job(s)", jobs.len());
                return Ok(Phase::Interrupted);
            }
            joined = jobs.join_next() => {
                match joined {
                    Some(Ok(summary)) => {
                        if summary.error.is_some() {
                            failures += 1;
                        }
                        println!("{}", serde_json::to_string(&summary)?);
                    }
                    Some(Err(e)) => {
                        log::error!("job task failed: {}", e);
                        failures += 1;
                    }
                    None => return Ok(Phase::Finished { failures }),
                }
            }
        }
    }
}
