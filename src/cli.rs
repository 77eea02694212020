//! Command-line interface for voxbatch
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Concurrent text-to-speech for long texts
#[derive(Parser, Debug)]
#[command(
    name = "voxbatch",
    version,
    about = "Concurrent text-to-speech for long texts"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: per-chunk log, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Options of the `synth` command. Unset values come from the config file.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SynthArgs {
    /// Plain-text file to read (UTF-8)
    pub input: PathBuf,

    /// Output directory (default: output.directory from config)
    #[arg(long, short = 'o', value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Neural voice short name (e.g., en-US-AriaNeural)
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Speaking rate (e.g., +10%, -20%)
    #[arg(long, value_name = "RATE", allow_hyphen_values = true)]
    pub rate: Option<String>,

    /// Pitch offset (e.g., +2Hz, -5Hz)
    #[arg(long, value_name = "PITCH", allow_hyphen_values = true)]
    pub pitch: Option<String>,

    /// Volume (e.g., +0%, -50%)
    #[arg(long, value_name = "VOLUME", allow_hyphen_values = true)]
    pub volume: Option<String>,

    /// Maximum sessions in flight
    #[arg(long, short = 'j', value_name = "N")]
    pub concurrency: Option<usize>,

    /// Retries after the first failed attempt of a chunk
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Wait between attempts (e.g., 500ms, 2s)
    #[arg(long, value_name = "DURATION", value_parser = parse_delay_ms)]
    pub retry_delay: Option<u64>,

    /// Merge chunk audio into larger files
    #[arg(long)]
    pub merge: bool,

    /// Chunks per merged file (0: one file per contiguous run). Implies --merge
    #[arg(long, value_name = "N")]
    pub merge_size: Option<usize>,

    /// Pack artifacts into a ZIP archive
    #[arg(long)]
    pub zip: bool,

    /// File stem of produced artifacts
    #[arg(long, value_name = "STEM")]
    pub stem: Option<String>,
}

/// Parse a retry delay into milliseconds.
///
/// Supports any duration format accepted by `humantime` (`500ms`, `2s`,
/// `1m30s`); a bare number is taken as milliseconds.
fn parse_delay_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → milliseconds
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synthesize a text file into audio files
    Synth(SynthArgs),

    /// Show how a text file would be split into chunks
    Split {
        /// Plain-text file to read (UTF-8)
        input: PathBuf,

        /// Character budget per chunk (default: pipeline.max_chunk_chars)
        #[arg(long, value_name = "CHARS")]
        max_chars: Option<usize>,
    },

    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration inspection actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
