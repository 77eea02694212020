//! Data types shared by the scheduler, sessions and the assembler.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Voice parameters applied to every chunk of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Neural voice short name (e.g. `en-US-AriaNeural`).
    pub voice: String,
    /// SSML prosody rate (e.g. `+10%`).
    pub rate: String,
    /// SSML prosody pitch (e.g. `-2Hz`).
    pub pitch: String,
    /// SSML prosody volume (e.g. `+0%`).
    pub volume: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: defaults::VOICE.to_string(),
            rate: defaults::RATE.to_string(),
            pitch: defaults::PITCH.to_string(),
            volume: defaults::VOLUME.to_string(),
        }
    }
}

impl VoiceSettings {
    /// Returns the name of the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("voice", &self.voice),
            ("rate", &self.rate),
            ("pitch", &self.pitch),
            ("volume", &self.volume),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// One unit of source text scheduled for synthesis.
///
/// `index` is the position in the original sequence and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub voice: String,
    pub rate: String,
    pub pitch: String,
    pub volume: String,
}

impl Chunk {
    /// Creates a chunk carrying a copy of the run's voice settings.
    pub fn new(index: usize, text: impl Into<String>, settings: &VoiceSettings) -> Self {
        Self {
            index,
            text: text.into(),
            voice: settings.voice.clone(),
            rate: settings.rate.clone(),
            pitch: settings.pitch.clone(),
            volume: settings.volume.clone(),
        }
    }
}

/// Retry policy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Wait between a failed attempt and the next one.
    pub delay_ms: u64,
    /// Upper bound of the random delay before the terminal callback.
    pub terminal_jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            delay_ms: defaults::RETRY_DELAY_MS,
            terminal_jitter_ms: defaults::TERMINAL_JITTER_MS,
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Running,
    Stopping,
    Completed,
    Error,
}

impl PipelineStatus {
    /// Whether `start()` may begin a new run from this status.
    pub fn can_start(self) -> bool {
        matches!(
            self,
            PipelineStatus::Idle | PipelineStatus::Completed | PipelineStatus::Error
        )
    }

    /// Whether sessions may still be in flight.
    pub fn is_active(self) -> bool {
        matches!(self, PipelineStatus::Running | PipelineStatus::Stopping)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::Running => "running",
            PipelineStatus::Stopping => "stopping",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// How a single chunk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Completed,
    Failed,
}

/// Progress report emitted after every session retirement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Chunk whose session just retired.
    pub index: usize,
    /// How that chunk ended.
    pub chunk: ChunkStatus,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    /// Estimated seconds until the run finishes, when known.
    pub eta_seconds: Option<f64>,
}

/// By-value copy of the scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineSnapshot {
    pub status: PipelineStatus,
    pub next_index: usize,
    pub active: usize,
    pub peak_active: usize,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Final result set of a run, handed to the completion sink.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub status: PipelineStatus,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    /// Audio per chunk index; `None` for failed or never-started chunks.
    pub results: Vec<Option<Vec<u8>>>,
}

/// Summary returned by `Scheduler::wait` once a run and its assembly finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    /// Artifact file names in emission order.
    pub artifacts: Vec<String>,
    /// Messages of artifacts the output sink rejected.
    pub assembly_errors: Vec<String>,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_settings_default_is_complete() {
        let settings = VoiceSettings::default();
        assert_eq!(settings.voice, "en-US-AriaNeural");
        assert_eq!(settings.missing_field(), None);
    }

    #[test]
    fn test_voice_settings_reports_first_missing_field() {
        let settings = VoiceSettings {
            rate: "  ".to_string(),
            volume: String::new(),
            ..Default::default()
        };
        assert_eq!(settings.missing_field(), Some("rate"));
    }

    #[test]
    fn test_chunk_copies_voice_settings() {
        let settings = VoiceSettings {
            voice: "de-DE-KatjaNeural".to_string(),
            rate: "+20%".to_string(),
            ..Default::default()
        };
        let chunk = Chunk::new(7, "Hallo Welt.", &settings);
        assert_eq!(chunk.index, 7);
        assert_eq!(chunk.text, "Hallo Welt.");
        assert_eq!(chunk.voice, "de-DE-KatjaNeural");
        assert_eq!(chunk.rate, "+20%");
        assert_eq!(chunk.pitch, settings.pitch);
    }

    #[test]
    fn test_status_start_rules() {
        assert!(PipelineStatus::Idle.can_start());
        assert!(PipelineStatus::Completed.can_start());
        assert!(PipelineStatus::Error.can_start());
        assert!(!PipelineStatus::Running.can_start());
        assert!(!PipelineStatus::Stopping.can_start());
        assert!(PipelineStatus::Stopping.is_active());
        assert!(!PipelineStatus::Error.is_active());
    }

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(PipelineStatus::Stopping.to_string(), "stopping");
        let json = serde_json::to_string(&PipelineStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn test_retry_settings_delay() {
        let retry = RetrySettings {
            max_retries: 2,
            delay_ms: 250,
            terminal_jitter_ms: 0,
        };
        assert_eq!(retry.delay(), Duration::from_millis(250));
    }
}
