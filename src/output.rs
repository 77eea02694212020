//! Output sinks receiving finished artifacts.

use crate::error::{Result, VoxbatchError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Persists artifacts produced by the assembler.
pub trait OutputSink: Send + Sync {
    /// Stores one artifact under `filename`.
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()>;

    /// Called once after the last artifact of a run.
    fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes each artifact as a file inside a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Creates the sink, creating `dir` if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for DirectorySink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let path = self.dir.join(filename);
        fs::write(&path, bytes).map_err(|e| VoxbatchError::Output {
            message: format!("{}: {e}", path.display()),
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

/// Packs every artifact of a run into one ZIP archive.
///
/// Entries are stored uncompressed; MP3 data does not shrink further. The
/// archive is only created on the first save (or on `finish`), so a run that
/// is cancelled before assembly leaves no file behind.
pub struct ZipSink {
    path: PathBuf,
    writer: Mutex<ZipState>,
}

enum ZipState {
    Pending,
    Open(ZipWriter<File>),
    Finished,
}

impl ZipSink {
    /// Prepares an archive at `path`, creating its parent directory.
    ///
    /// An existing file is truncated when the first artifact arrives.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            writer: Mutex::new(ZipState::Pending),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<ZipWriter<File>> {
        let file = File::create(&self.path)?;
        debug!(path = %self.path.display(), "archive created");
        Ok(ZipWriter::new(file))
    }
}

impl OutputSink for ZipSink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let mut state = lock(&self.writer);
        if matches!(*state, ZipState::Pending) {
            *state = ZipState::Open(self.open()?);
        }
        let ZipState::Open(writer) = &mut *state else {
            return Err(VoxbatchError::Output {
                message: format!("{} is already finished", self.path.display()),
            });
        };
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer
            .start_file(filename, options)
            .map_err(|e| VoxbatchError::Output {
                message: format!("{filename}: {e}"),
            })?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        let mut state = lock(&self.writer);
        let writer = match std::mem::replace(&mut *state, ZipState::Finished) {
            ZipState::Open(writer) => writer,
            ZipState::Pending => self.open()?,
            ZipState::Finished => return Ok(()),
        };
        writer.finish().map_err(|e| VoxbatchError::Output {
            message: format!("{}: {e}", self.path.display()),
        })?;
        debug!(path = %self.path.display(), "archive finished");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "zip"
    }
}

/// One artifact kept in memory by [`CollectorSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Keeps artifacts in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    artifacts: Arc<Mutex<Vec<Artifact>>>,
    finished: Arc<Mutex<usize>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts received so far, in emission order.
    pub fn artifacts(&self) -> Vec<Artifact> {
        lock(&self.artifacts).clone()
    }

    /// File names received so far, in emission order.
    pub fn filenames(&self) -> Vec<String> {
        lock(&self.artifacts)
            .iter()
            .map(|a| a.filename.clone())
            .collect()
    }

    /// How many times `finish` was called.
    pub fn finish_count(&self) -> usize {
        *lock(&self.finished)
    }
}

impl OutputSink for CollectorSink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        lock(&self.artifacts).push(Artifact {
            filename: filename.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        *lock(&self.finished) += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
