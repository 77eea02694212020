//! Batch synthesis entry point.
//!
//! Wires the command-line flow together:
//! read text → split → scheduler (sessions) → assembler → sink

use crate::cli::SynthArgs;
use crate::config::Config;
use crate::error::{Result, VoxbatchError};
use crate::output::{DirectorySink, OutputSink, ZipSink};
use crate::pipeline::observer::{LogObserver, PipelineObserver};
use crate::pipeline::progress::format_eta;
use crate::pipeline::scheduler::{PipelineJob, Scheduler};
use crate::pipeline::types::{ChunkStatus, CompletionReport, PipelineOutcome, ProgressEvent};
use crate::text::split_text;
use crate::tts::transport::TransportFactory;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Applies `synth` command-line overrides on top of the loaded config.
pub fn apply_overrides(config: &mut Config, args: &SynthArgs) {
    if let Some(dir) = &args.out {
        config.output.directory = dir.clone();
    }
    if let Some(voice) = &args.voice {
        config.voice.voice = voice.clone();
    }
    if let Some(rate) = &args.rate {
        config.voice.rate = rate.clone();
    }
    if let Some(pitch) = &args.pitch {
        config.voice.pitch = pitch.clone();
    }
    if let Some(volume) = &args.volume {
        config.voice.volume = volume.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.pipeline.concurrency = concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        config.pipeline.max_retries = max_retries;
    }
    if let Some(delay_ms) = args.retry_delay {
        config.pipeline.retry_delay_ms = delay_ms;
    }
    if args.merge {
        config.merge.enabled = true;
    }
    if let Some(size) = args.merge_size {
        config.merge.enabled = true;
        config.merge.chunk_size = size;
    }
    if args.zip {
        config.output.zip = true;
    }
    if let Some(stem) = &args.stem {
        config.output.stem = stem.clone();
    }
}

/// Reads a UTF-8 text file and splits it into chunk texts.
pub fn read_chunks(path: &Path, max_chars: usize) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| {
        VoxbatchError::Other(format!("Failed to read {}: {e}", path.display()))
    })?;
    Ok(split_text(&text, max_chars))
}

/// Creates the sink selected by `[output]` and returns where it writes.
pub fn build_sink(config: &Config) -> Result<(Arc<dyn OutputSink>, PathBuf)> {
    if config.output.zip {
        let path = config
            .output
            .directory
            .join(format!("{}.zip", config.output.stem));
        let sink = ZipSink::create(&path)?;
        Ok((Arc::new(sink), path))
    } else {
        let sink = DirectorySink::create(&config.output.directory)?;
        let dir = sink.dir().to_path_buf();
        Ok((Arc::new(sink), dir))
    }
}

/// Run the synth command: read → split → synthesize → write artifacts.
///
/// Ctrl-C stops admitting new chunks; a second Ctrl-C cancels the run.
pub async fn run_synth(
    config: &Config,
    input: &Path,
    factory: Arc<dyn TransportFactory>,
    observer: Arc<dyn PipelineObserver>,
) -> Result<PipelineOutcome> {
    config.validate()?;
    let texts = read_chunks(input, config.pipeline.max_chunk_chars)?;
    let (sink, destination) = build_sink(config)?;
    info!(
        chunks = texts.len(),
        input = %input.display(),
        destination = %destination.display(),
        transport = factory.name(),
        "synthesis starting"
    );

    let job = PipelineJob::new(texts)
        .with_concurrency(config.pipeline.concurrency)
        .with_voice(config.voice_settings())
        .with_retry(config.retry_settings())
        .with_merge(config.merge_policy())
        .with_naming(config.naming())
        .with_observer(observer)
        .with_sink(sink);

    let scheduler = Scheduler::new(factory);
    scheduler.configure(job)?;
    if !scheduler.start() {
        return Err(VoxbatchError::InvalidState {
            action: "start".to_string(),
            status: scheduler.status().to_string(),
        });
    }

    let mut wait = std::pin::pin!(scheduler.wait());
    let mut stopping = false;
    let mut listening = true;
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            signal = tokio::signal::ctrl_c(), if listening => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl-C: {e}");
                    listening = false;
                } else if stopping {
                    warn!("cancelling run");
                    scheduler.clear();
                } else {
                    warn!("stopping after in-flight chunks (Ctrl-C again to cancel)");
                    scheduler.stop();
                    stopping = true;
                }
            }
        }
    };

    if outcome.is_none() {
        // A cancelled assembly stops after its current artifact and finishes the sink
        while scheduler.is_assembling() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    outcome.ok_or_else(|| VoxbatchError::Other("synthesis cancelled".to_string()))
}

/// Draws a progress bar on stderr; falls back to logging when hidden.
pub struct ProgressBarObserver {
    bar: ProgressBar,
    log: LogObserver,
}

impl ProgressBarObserver {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(0);
            bar.set_style(
                // SAFETY: hardcoded template string, always valid
                #[allow(clippy::expect_used)]
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")
                    .expect("hardcoded progress bar template")
                    .progress_chars("#>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            log: LogObserver,
        }
    }
}

impl PipelineObserver for ProgressBarObserver {
    fn on_progress(&self, event: ProgressEvent) {
        if self.bar.is_hidden() {
            self.log.on_progress(event);
            return;
        }
        if event.chunk == ChunkStatus::Failed {
            self.bar
                .println(format!("chunk {} failed after all retries", event.index + 1));
        }
        self.bar.set_length(event.total as u64);
        self.bar.inc(1);
        self.bar.set_message(format!(
            "({} failed, eta {})",
            event.failed,
            format_eta(event.eta_seconds)
        ));
    }

    fn on_complete(&self, report: &CompletionReport) {
        self.bar.finish_and_clear();
        self.log.on_complete(report);
    }

    fn on_error(&self, error: &VoxbatchError) {
        self.bar.suspend(|| self.log.on_error(error));
    }
}
