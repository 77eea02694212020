//! Progress, completion and error reporting for pipeline runs.

use crate::error::VoxbatchError;
use crate::pipeline::progress::format_eta;
use crate::pipeline::types::{ChunkStatus, CompletionReport, ProgressEvent};
use tracing::{error, info, warn};

/// Receives the events of a pipeline run.
///
/// Called from the scheduler's own task; implementations must not block for
/// long. All methods have no-op defaults.
pub trait PipelineObserver: Send + Sync {
    /// Called after every session retirement.
    fn on_progress(&self, _event: ProgressEvent) {}

    /// Called exactly once per run, before the results are assembled.
    fn on_complete(&self, _report: &CompletionReport) {}

    /// Called for configuration and assembly errors.
    fn on_error(&self, _error: &VoxbatchError) {}
}

/// Observer that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_progress(&self, event: ProgressEvent) {
        match event.chunk {
            ChunkStatus::Completed => info!(
                index = event.index,
                processed = event.processed,
                failed = event.failed,
                total = event.total,
                "chunk done, eta {}",
                format_eta(event.eta_seconds)
            ),
            ChunkStatus::Failed => warn!(
                index = event.index,
                processed = event.processed,
                failed = event.failed,
                total = event.total,
                "chunk failed, eta {}",
                format_eta(event.eta_seconds)
            ),
        }
    }

    fn on_complete(&self, report: &CompletionReport) {
        info!(
            status = %report.status,
            processed = report.processed,
            failed = report.failed,
            total = report.total,
            "run finished"
        );
    }

    fn on_error(&self, error: &VoxbatchError) {
        error!("{error}");
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl PipelineObserver for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PipelineStatus;

    #[test]
    fn test_log_observer_handles_every_event() {
        // Just ensure it doesn't panic without a subscriber
        let observer = LogObserver;
        for chunk in [ChunkStatus::Completed, ChunkStatus::Failed] {
            observer.on_progress(ProgressEvent {
                index: 0,
                chunk,
                processed: 1,
                failed: 0,
                total: 2,
                eta_seconds: Some(3.0),
            });
        }
        observer.on_complete(&CompletionReport {
            status: PipelineStatus::Completed,
            processed: 2,
            failed: 0,
            total: 2,
            results: vec![Some(vec![1]), Some(vec![2])],
        });
        observer.on_error(&VoxbatchError::Other("boom".to_string()));
    }

    #[test]
    fn test_null_observer_is_usable_as_trait_object() {
        let observer: &dyn PipelineObserver = &NullObserver;
        observer.on_error(&VoxbatchError::Other("ignored".to_string()));
    }
}
