use crate::defaults;
use crate::error::VoxbatchError;
use crate::pipeline::assembler::{ArtifactNaming, MergePolicy};
use crate::pipeline::types::{RetrySettings, VoiceSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub voice: VoiceConfig,
    pub pipeline: PipelineConfig,
    pub merge: MergeConfig,
    pub output: OutputConfig,
}

/// Voice and prosody applied to every chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice: String,
    pub rate: String,
    pub pitch: String,
    pub volume: String,
}

/// Scheduling and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub terminal_jitter_ms: u64,
    pub max_chunk_chars: usize,
}

/// Merging of chunk audio into larger files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    pub enabled: bool,
    /// Chunks per merged file; 0 merges each contiguous run into one file.
    pub chunk_size: usize,
}

/// Where artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub stem: String,
    /// Pack all artifacts into `{directory}/{stem}.zip` instead of loose files.
    pub zip: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: defaults::VOICE.to_string(),
            rate: defaults::RATE.to_string(),
            pitch: defaults::PITCH.to_string(),
            volume: defaults::VOLUME.to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
            max_retries: defaults::MAX_RETRIES,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            terminal_jitter_ms: defaults::TERMINAL_JITTER_MS,
            max_chunk_chars: defaults::MAX_CHUNK_CHARS,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size: defaults::MERGE_CHUNK_SIZE,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            stem: defaults::OUTPUT_STEM.to_string(),
            zip: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXBATCH_VOICE → voice.voice
    /// - VOXBATCH_CONCURRENCY → pipeline.concurrency
    /// - VOXBATCH_OUTPUT_DIR → output.directory
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(voice) = std::env::var("VOXBATCH_VOICE")
            && !voice.is_empty()
        {
            self.voice.voice = voice;
        }

        if let Ok(concurrency) = std::env::var("VOXBATCH_CONCURRENCY")
            && let Ok(concurrency) = concurrency.trim().parse::<usize>()
        {
            self.pipeline.concurrency = concurrency;
        }

        if let Ok(dir) = std::env::var("VOXBATCH_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.output.directory = PathBuf::from(dir);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxbatch/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxbatch")
            .join("config.toml")
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |key: &str, message: &str| VoxbatchError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if let Some(field) = self.voice_settings().missing_field() {
            return Err(invalid(&format!("voice.{field}"), "must not be empty"));
        }
        if self.pipeline.concurrency == 0 {
            return Err(invalid("pipeline.concurrency", "must be at least 1"));
        }
        if self.pipeline.max_chunk_chars == 0 {
            return Err(invalid("pipeline.max_chunk_chars", "must be at least 1"));
        }
        if self.output.stem.trim().is_empty() {
            return Err(invalid("output.stem", "must not be empty"));
        }
        Ok(())
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            voice: self.voice.voice.clone(),
            rate: self.voice.rate.clone(),
            pitch: self.voice.pitch.clone(),
            volume: self.voice.volume.clone(),
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_retries: self.pipeline.max_retries,
            delay_ms: self.pipeline.retry_delay_ms,
            terminal_jitter_ms: self.pipeline.terminal_jitter_ms,
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        if self.merge.enabled {
            MergePolicy::groups_of(self.merge.chunk_size)
        } else {
            MergePolicy::disabled()
        }
    }

    pub fn naming(&self) -> ArtifactNaming {
        ArtifactNaming::new(self.output.stem.clone())
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
