//! voxbatch - Concurrent text-to-speech for long texts
//!
//! Splits a text into chunks, synthesizes them over many TTS sessions at
//! once, and reassembles the audio in reading order.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod text;
pub mod tts;

// Core seams (transport → scheduler → sink)
pub use output::{CollectorSink, DirectorySink, OutputSink, ZipSink};
pub use pipeline::observer::{LogObserver, PipelineObserver};
pub use tts::transport::{MockTransportFactory, Transport, TransportFactory};

// Pipeline
pub use pipeline::assembler::{ArtifactNaming, MergePolicy};
pub use pipeline::scheduler::{PipelineJob, Scheduler};
pub use pipeline::types::{PipelineOutcome, PipelineStatus, RetrySettings, VoiceSettings};

// Error handling
pub use error::{Result, VoxbatchError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_short_hash_when_built_from_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
