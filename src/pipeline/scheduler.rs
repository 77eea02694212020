//! Bounded-concurrency scheduler driving one session per chunk.
//!
//! All counters live in one [`PipelineState`] behind a mutex that is never
//! held across an await. Sessions report back through an unbounded queue
//! drained by a single dispatcher task per run, so admission, retirement and
//! the completion check are serialized. `clear()` bumps `run_id` under the
//! lock and aborts the dispatcher; work from the old run that still reaches
//! the state sees the new id and is dropped.
//!
//! Assembly runs on the blocking pool after the status has already moved to
//! `Completed` or `Error`. Until it has delivered the outcome the scheduler
//! refuses `start()` and `configure()`, so two runs never write to one sink.

use crate::error::{Result, VoxbatchError};
use crate::output::OutputSink;
use crate::pipeline::assembler::{ArtifactNaming, Assembler, AssemblyReport, MergePolicy};
use crate::pipeline::observer::{LogObserver, PipelineObserver};
use crate::pipeline::progress::ProgressClock;
use crate::pipeline::types::{
    Chunk, ChunkStatus, CompletionReport, PipelineOutcome, PipelineSnapshot, PipelineStatus,
    ProgressEvent, RetrySettings, VoiceSettings,
};
use crate::tts::session::{Session, SessionHandle, SessionOutcome};
use crate::tts::transport::TransportFactory;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a run needs, handed to [`Scheduler::configure`].
#[derive(Clone)]
pub struct PipelineJob {
    /// Chunk texts in reading order; indices are assigned from their position.
    pub texts: Vec<String>,
    /// Maximum sessions in flight.
    pub concurrency: usize,
    pub voice: VoiceSettings,
    pub retry: RetrySettings,
    pub merge: MergePolicy,
    pub naming: ArtifactNaming,
    pub observer: Arc<dyn PipelineObserver>,
    pub sink: Option<Arc<dyn OutputSink>>,
}

impl PipelineJob {
    /// A job with default settings, logging observer and no sink.
    pub fn new(texts: Vec<String>) -> Self {
        Self {
            texts,
            concurrency: crate::defaults::CONCURRENCY,
            voice: VoiceSettings::default(),
            retry: RetrySettings::default(),
            merge: MergePolicy::default(),
            naming: ArtifactNaming::default(),
            observer: Arc::new(LogObserver),
            sink: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_voice(mut self, voice: VoiceSettings) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_naming(mut self, naming: ArtifactNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Checks the job and returns its sink.
    fn validate(&self) -> Result<Arc<dyn OutputSink>> {
        if let Some(field) = self.voice.missing_field() {
            return Err(VoxbatchError::Configuration {
                message: format!("voice setting `{field}` is empty"),
            });
        }
        if self.concurrency == 0 {
            return Err(VoxbatchError::Configuration {
                message: "concurrency limit must be at least 1".to_string(),
            });
        }
        self.sink.clone().ok_or_else(|| VoxbatchError::Configuration {
            message: "no output sink".to_string(),
        })
    }
}

/// Validated job shared by the dispatcher of each run.
struct PreparedJob {
    chunks: Vec<Chunk>,
    concurrency: usize,
    retry: RetrySettings,
    assembler: Assembler,
    observer: Arc<dyn PipelineObserver>,
    sink: Arc<dyn OutputSink>,
}

enum DispatchEvent {
    Retired(SessionOutcome),
    Wake,
}

#[derive(Default)]
struct PipelineState {
    status: PipelineStatus,
    run_id: u64,
    next_index: usize,
    active: usize,
    peak_active: usize,
    processed: usize,
    failed: usize,
    total: usize,
    results: Vec<Option<Vec<u8>>>,
    clock: ProgressClock,
    job: Option<Arc<PreparedJob>>,
    wake: Option<mpsc::UnboundedSender<DispatchEvent>>,
    outcome: Option<oneshot::Receiver<PipelineOutcome>>,
    dispatcher: Option<JoinHandle<()>>,
    /// A finished run's artifacts are still being written.
    assembling: bool,
    assembly_cancel: Option<Arc<AtomicBool>>,
}

impl PipelineState {
    fn reset_counters(&mut self, total: usize) {
        self.next_index = 0;
        self.active = 0;
        self.peak_active = 0;
        self.processed = 0;
        self.failed = 0;
        self.total = total;
        self.results = vec![None; total];
        self.clock.reset();
    }

    fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            status: self.status,
            next_index: self.next_index,
            active: self.active,
            peak_active: self.peak_active,
            processed: self.processed,
            failed: self.failed,
            total: self.total,
        }
    }
}

fn lock(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the scheduler free again once a blocking assembly ends, even if it
/// panicked or never got to run.
struct AssemblyGuard {
    state: Arc<Mutex<PipelineState>>,
}

impl Drop for AssemblyGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.assembling = false;
        state.assembly_cancel = None;
    }
}

/// Drives the chunks of a configured job through TTS sessions.
///
/// Independent schedulers share nothing and may run side by side.
pub struct Scheduler {
    factory: Arc<dyn TransportFactory>,
    state: Arc<Mutex<PipelineState>>,
}

impl Scheduler {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            state: Arc::new(Mutex::new(PipelineState::default())),
        }
    }

    /// Validates and stores the job for the next `start()`.
    ///
    /// A rejected job leaves the scheduler in `Error` and is reported to the
    /// job's observer. Not allowed while a run is active or still assembling.
    pub fn configure(&self, job: PipelineJob) -> Result<()> {
        let mut state = lock(&self.state);
        if state.status.is_active() || state.assembling {
            let status = if state.assembling {
                "assembling".to_string()
            } else {
                state.status.to_string()
            };
            let error = VoxbatchError::InvalidState {
                action: "configure".to_string(),
                status,
            };
            drop(state);
            job.observer.on_error(&error);
            return Err(error);
        }

        let sink = match job.validate() {
            Ok(sink) => sink,
            Err(error) => {
                state.status = PipelineStatus::Error;
                state.job = None;
                drop(state);
                warn!("{error}");
                job.observer.on_error(&error);
                return Err(error);
            }
        };

        let chunks: Vec<Chunk> = job
            .texts
            .iter()
            .enumerate()
            .map(|(index, text)| Chunk::new(index, text.as_str(), &job.voice))
            .collect();
        debug!(
            chunks = chunks.len(),
            concurrency = job.concurrency,
            sink = sink.name(),
            "pipeline configured"
        );

        state.reset_counters(chunks.len());
        state.status = PipelineStatus::Idle;
        state.job = Some(Arc::new(PreparedJob {
            chunks,
            concurrency: job.concurrency,
            retry: job.retry,
            assembler: Assembler::new(job.merge, job.naming),
            observer: job.observer,
            sink,
        }));
        Ok(())
    }

    /// Begins a run of the configured job.
    ///
    /// Returns `false` (and changes nothing) unless the scheduler is `Idle`,
    /// `Completed` or `Error` with a valid job and no assembly in progress.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.status.can_start() {
            warn!(status = %state.status, "start ignored");
            return false;
        }
        if state.assembling {
            warn!(status = %state.status, "start ignored: previous run still assembling");
            return false;
        }
        let Some(job) = state.job.clone() else {
            warn!(status = %state.status, "start ignored: no valid job configured");
            return false;
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                drop(state);
                let error = VoxbatchError::InvalidState {
                    action: "start".to_string(),
                    status: format!("outside a tokio runtime ({e})"),
                };
                job.observer.on_error(&error);
                return false;
            }
        };

        state.run_id += 1;
        state.reset_counters(job.chunks.len());
        state.clock.start();
        state.status = PipelineStatus::Running;

        let (wake, events) = mpsc::unbounded_channel();
        let (done, outcome) = oneshot::channel();
        let dispatcher = Dispatcher {
            run_id: state.run_id,
            job: job.clone(),
            factory: self.factory.clone(),
            state: self.state.clone(),
            events: wake.clone(),
            sessions: HashMap::new(),
        };
        if let Some(previous) = state.dispatcher.take() {
            previous.abort();
        }
        state.wake = Some(wake);
        state.outcome = Some(outcome);
        state.dispatcher = Some(runtime.spawn(dispatcher.run(events, done)));

        info!(
            run = state.run_id,
            chunks = job.chunks.len(),
            concurrency = job.concurrency,
            "pipeline started"
        );
        true
    }

    /// Halts admission. Sessions already in flight run to completion.
    ///
    /// Only valid while `Running`; returns whether the request was accepted.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status != PipelineStatus::Running {
            warn!(status = %state.status, "stop ignored");
            return false;
        }
        state.status = PipelineStatus::Stopping;
        if let Some(wake) = &state.wake
            && wake.send(DispatchEvent::Wake).is_err()
        {
            debug!("dispatcher already gone");
        }
        info!(run = state.run_id, "pipeline stopping");
        true
    }

    /// Cancels every session, zeroes the counters and returns to `Idle`.
    ///
    /// Valid in any state and idempotent. The configured job is kept, so the
    /// scheduler can be started again. An assembly in progress stops after
    /// the artifact it is writing; `start()` is refused until it has.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.run_id += 1;
        if let Some(dispatcher) = state.dispatcher.take() {
            // Dropping the dispatcher drops its session handles
            dispatcher.abort();
        }
        if let Some(cancel) = &state.assembly_cancel {
            cancel.store(true, Ordering::Release);
        }
        state.wake = None;
        state.outcome = None;
        state.reset_counters(0);
        state.status = PipelineStatus::Idle;
        debug!(run = state.run_id, "pipeline cleared");
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        lock(&self.state).snapshot()
    }

    pub fn status(&self) -> PipelineStatus {
        lock(&self.state).status
    }

    /// Whether a finished run is still writing its artifacts.
    pub fn is_assembling(&self) -> bool {
        lock(&self.state).assembling
    }

    /// Waits for the current run and its assembly to finish.
    ///
    /// Returns `None` when there is no run to wait for, the run was cleared,
    /// or its outcome was already taken by an earlier call.
    pub async fn wait(&self) -> Option<PipelineOutcome> {
        let outcome = lock(&self.state).outcome.take()?;
        outcome.await.ok()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(dispatcher) = state.dispatcher.take() {
            dispatcher.abort();
        }
        if let Some(cancel) = &state.assembly_cancel {
            cancel.store(true, Ordering::Release);
        }
    }
}

/// Run that reached its completion condition.
struct FinishedRun {
    report: CompletionReport,
    elapsed_secs: f64,
    cancelled: Arc<AtomicBool>,
}

/// Owns the session handles of one run and serializes its events.
struct Dispatcher {
    run_id: u64,
    job: Arc<PreparedJob>,
    factory: Arc<dyn TransportFactory>,
    state: Arc<Mutex<PipelineState>>,
    events: mpsc::UnboundedSender<DispatchEvent>,
    sessions: HashMap<usize, SessionHandle>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<DispatchEvent>,
        done: oneshot::Sender<PipelineOutcome>,
    ) {
        loop {
            if !self.admit() {
                return;
            }
            if let Some(finished) = self.check_completion() {
                self.finish(finished, done);
                return;
            }
            match events.recv().await {
                Some(DispatchEvent::Retired(outcome)) => {
                    if !self.retire(outcome) {
                        return;
                    }
                }
                Some(DispatchEvent::Wake) => {}
                None => return,
            }
        }
    }

    /// Starts sessions in index order while a slot is free.
    ///
    /// Returns `false` when the run has been superseded.
    fn admit(&mut self) -> bool {
        loop {
            let chunk = {
                let mut state = lock(&self.state);
                if state.run_id != self.run_id {
                    return false;
                }
                if state.status != PipelineStatus::Running
                    || state.active >= self.job.concurrency
                    || state.next_index >= state.total
                {
                    return true;
                }
                let index = state.next_index;
                state.next_index += 1;
                state.active += 1;
                state.peak_active = state.peak_active.max(state.active);
                self.job.chunks[index].clone()
            };

            let index = chunk.index;
            let events = self.events.clone();
            let handle = Session::start(
                chunk,
                self.job.retry,
                self.factory.clone(),
                move |outcome| {
                    if events.send(DispatchEvent::Retired(outcome)).is_err() {
                        debug!(index, "session finished after its run was cleared");
                    }
                },
            );
            debug!(index, "session admitted");
            self.sessions.insert(index, handle);
        }
    }

    /// Records a session's outcome and reports progress.
    ///
    /// Returns `false` when the run has been superseded.
    fn retire(&mut self, outcome: SessionOutcome) -> bool {
        let index = outcome.index;
        if self.sessions.remove(&index).is_none() {
            warn!(index, "outcome for a session that is not running");
            return true;
        }

        let event = {
            let mut state = lock(&self.state);
            if state.run_id != self.run_id {
                return false;
            }
            let chunk = if outcome.failed() {
                state.failed += 1;
                ChunkStatus::Failed
            } else {
                state.processed += 1;
                ChunkStatus::Completed
            };
            state.results[index] = outcome.audio;
            state.active -= 1;
            ProgressEvent {
                index,
                chunk,
                processed: state.processed,
                failed: state.failed,
                total: state.total,
                eta_seconds: state.clock.eta(state.processed + state.failed, state.total),
            }
        };

        if let Some(error) = &outcome.error {
            debug!(index, attempts = outcome.attempts, "session failed: {error}");
        }
        self.job.observer.on_progress(event);
        true
    }

    /// Ends the run once nothing is in flight and nothing more will be
    /// admitted.
    fn check_completion(&self) -> Option<FinishedRun> {
        let mut state = lock(&self.state);
        if state.run_id != self.run_id || !state.status.is_active() || state.active > 0 {
            return None;
        }
        if state.status == PipelineStatus::Running && state.next_index < state.total {
            return None;
        }

        state.status = if state.failed > 0 {
            PipelineStatus::Error
        } else {
            PipelineStatus::Completed
        };
        state.wake = None;
        let cancelled = Arc::new(AtomicBool::new(false));
        state.assembling = true;
        state.assembly_cancel = Some(cancelled.clone());
        let elapsed_secs = state
            .clock
            .elapsed()
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());
        Some(FinishedRun {
            report: CompletionReport {
                status: state.status,
                processed: state.processed,
                failed: state.failed,
                total: state.total,
                results: std::mem::take(&mut state.results),
            },
            elapsed_secs,
            cancelled,
        })
    }

    /// Reports completion and hands assembly to the blocking pool.
    ///
    /// Must not await: the assembling flag set by `check_completion` is only
    /// released by the guard moved into the blocking task.
    fn finish(self, finished: FinishedRun, done: oneshot::Sender<PipelineOutcome>) {
        let FinishedRun {
            mut report,
            elapsed_secs,
            cancelled,
        } = finished;
        let guard = AssemblyGuard {
            state: self.state.clone(),
        };
        info!(
            run = self.run_id,
            status = %report.status,
            processed = report.processed,
            failed = report.failed,
            total = report.total,
            "pipeline finished"
        );
        self.job.observer.on_complete(&report);

        let mut outcome = PipelineOutcome {
            status: report.status,
            processed: report.processed,
            failed: report.failed,
            total: report.total,
            artifacts: Vec::new(),
            assembly_errors: Vec::new(),
            elapsed_secs,
        };

        let run_id = self.run_id;
        let job = self.job.clone();
        // Sinks do blocking file I/O
        tokio::task::spawn_blocking(move || {
            let assembled = panic::catch_unwind(AssertUnwindSafe(|| {
                job.assembler.assemble_until(
                    &mut report.results,
                    job.sink.as_ref(),
                    job.observer.as_ref(),
                    &cancelled,
                )
            }));
            let assembly = match assembled {
                Ok(assembly) => assembly,
                Err(_) => {
                    let error = VoxbatchError::Assembly {
                        artifact: job.sink.name().to_string(),
                        message: "assembly panicked".to_string(),
                    };
                    job.observer.on_error(&error);
                    AssemblyReport {
                        artifacts: Vec::new(),
                        errors: vec![error.to_string()],
                    }
                }
            };
            outcome.artifacts = assembly.artifacts;
            outcome.assembly_errors = assembly.errors;

            // Free the scheduler before a waiter can observe the outcome
            drop(guard);
            if done.send(outcome).is_err() {
                debug!(run = run_id, "nobody waiting for the outcome");
            }
        });
    }
}
