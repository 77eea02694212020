//! Concurrent synthesis pipeline.
//!
//! A [`Scheduler`] admits chunks into TTS sessions under a concurrency
//! ceiling, reports progress as sessions retire, and once every admitted
//! chunk is terminal hands the index-aligned results to the [`Assembler`].

pub mod assembler;
pub mod observer;
pub mod progress;
pub mod scheduler;
pub mod types;

pub use assembler::{ArtifactNaming, Assembler, AssemblyReport, MergePolicy, plan_artifacts};
pub use observer::{LogObserver, NullObserver, PipelineObserver};
pub use progress::{ProgressClock, eta_seconds, format_eta};
pub use scheduler::{PipelineJob, Scheduler};
pub use types::{
    Chunk, ChunkStatus, CompletionReport, PipelineOutcome, PipelineSnapshot, PipelineStatus,
    ProgressEvent, RetrySettings, VoiceSettings,
};
