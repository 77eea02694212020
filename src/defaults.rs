//! Default configuration constants for voxbatch.
//!
//! Shared between the config file layer, the CLI and the pipeline so every
//! entry point starts from the same values.

/// Default neural voice.
pub const VOICE: &str = "en-US-AriaNeural";

/// Default speaking rate, as an SSML prosody percentage.
pub const RATE: &str = "+0%";

/// Default pitch, as an SSML prosody offset in Hz.
pub const PITCH: &str = "+0Hz";

/// Default volume, as an SSML prosody percentage.
pub const VOLUME: &str = "+0%";

/// Default number of sessions allowed in flight at once.
///
/// The read-aloud endpoint starts throttling clients that open many sockets
/// at once; a handful keeps throughput high without tripping that.
pub const CONCURRENCY: usize = 4;

/// Default number of retries after the first failed attempt.
pub const MAX_RETRIES: u32 = 3;

/// Default wait between a failed attempt and the next one, in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Upper bound of the random delay before a session reports its result.
pub const TERMINAL_JITTER_MS: u64 = 50;

/// Default character budget for one chunk of text.
pub const MAX_CHUNK_CHARS: usize = 3000;

/// Default file stem for produced artifacts.
pub const OUTPUT_STEM: &str = "book";

/// Extension of produced artifacts (the endpoint streams MP3).
pub const OUTPUT_EXTENSION: &str = "mp3";

/// Default number of chunks per merged artifact when merging is enabled.
/// 0 merges every contiguous run into a single file.
pub const MERGE_CHUNK_SIZE: usize = 0;

/// Audio format requested from the endpoint.
pub const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";
