//! Ordered merging of per-chunk audio into output artifacts.
//!
//! Results arrive index-aligned, with `None` holes for chunks that failed or
//! never ran. Artifacts are always built in ascending index order, so the
//! order sessions finished in never shows up in the output.

use crate::defaults;
use crate::error::VoxbatchError;
use crate::output::OutputSink;
use crate::pipeline::observer::PipelineObserver;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// How successful chunks are grouped into artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub enabled: bool,
    /// Maximum chunks per artifact; `None` is unbounded.
    pub chunk_size: Option<usize>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl MergePolicy {
    /// One artifact per successful chunk.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            chunk_size: None,
        }
    }

    /// Each contiguous run of successes becomes one artifact.
    pub fn unbounded() -> Self {
        Self {
            enabled: true,
            chunk_size: None,
        }
    }

    /// Groups of at most `size` consecutive chunks. 0 is unbounded.
    pub fn groups_of(size: usize) -> Self {
        Self {
            enabled: true,
            chunk_size: (size > 0).then_some(size),
        }
    }

    /// Whether each chunk ends up in its own artifact.
    pub fn is_per_chunk(&self) -> bool {
        !self.enabled || self.chunk_size == Some(1)
    }
}

/// File names of produced artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    pub stem: String,
    pub extension: String,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self::new(defaults::OUTPUT_STEM)
    }
}

impl ArtifactNaming {
    pub fn new(stem: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            extension: defaults::OUTPUT_EXTENSION.to_string(),
        }
    }

    /// `book_0003.mp3` for one chunk, `book_0001-0004.mp3` for a group.
    /// Numbers are 1-based.
    pub fn file_name(&self, span: &RangeInclusive<usize>) -> String {
        let (first, last) = (span.start() + 1, span.end() + 1);
        if first == last {
            format!("{}_{first:04}.{}", self.stem, self.extension)
        } else {
            format!("{}_{first:04}-{last:04}.{}", self.stem, self.extension)
        }
    }

    /// Name of an artifact holding the whole run.
    pub fn whole_name(&self) -> String {
        format!("{}.{}", self.stem, self.extension)
    }
}

/// Splits the successful chunks into artifact spans, in index order.
///
/// A hole closes the open group; the next success starts a new one.
pub fn plan_artifacts(
    results: &[Option<Vec<u8>>],
    policy: &MergePolicy,
) -> Vec<RangeInclusive<usize>> {
    let limit = if policy.is_per_chunk() {
        Some(1)
    } else {
        policy.chunk_size
    };

    let mut spans = Vec::new();
    let mut open: Option<(usize, usize)> = None;
    for (index, slot) in results.iter().enumerate() {
        if slot.is_none() {
            if let Some((first, last)) = open.take() {
                spans.push(first..=last);
            }
            continue;
        }
        open = match open {
            Some((first, _)) if limit.is_none_or(|n| index - first < n) => Some((first, index)),
            Some((first, last)) => {
                spans.push(first..=last);
                Some((index, index))
            }
            None => Some((index, index)),
        };
    }
    if let Some((first, last)) = open {
        spans.push(first..=last);
    }
    spans
}

/// What an assembly pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Names of the artifacts the sink accepted, in emission order.
    pub artifacts: Vec<String>,
    /// Messages of artifacts that could not be stored.
    pub errors: Vec<String>,
}

/// Builds artifacts from a finished run and hands them to a sink.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    policy: MergePolicy,
    naming: ArtifactNaming,
}

impl Assembler {
    pub fn new(policy: MergePolicy, naming: ArtifactNaming) -> Self {
        Self { policy, naming }
    }

    /// Emits every planned artifact to `sink`, then finishes the sink.
    ///
    /// Buffers are taken out of `results` as they are used. A sink failure is
    /// reported to `observer` and assembly moves on to the next artifact.
    pub fn assemble(
        &self,
        results: &mut [Option<Vec<u8>>],
        sink: &dyn OutputSink,
        observer: &dyn PipelineObserver,
    ) -> AssemblyReport {
        self.assemble_until(results, sink, observer, &AtomicBool::new(false))
    }

    /// Like [`Assembler::assemble`], but stops before the next artifact once
    /// `cancelled` is set. The sink is finished either way.
    pub fn assemble_until(
        &self,
        results: &mut [Option<Vec<u8>>],
        sink: &dyn OutputSink,
        observer: &dyn PipelineObserver,
        cancelled: &AtomicBool,
    ) -> AssemblyReport {
        let spans = plan_artifacts(results, &self.policy);
        let whole_run = !self.policy.is_per_chunk()
            && spans.len() == 1
            && spans[0].start() == &0
            && spans[0].end() + 1 == results.len();

        let mut report = AssemblyReport::default();
        for span in spans {
            if cancelled.load(Ordering::Acquire) {
                debug!(sink = sink.name(), "assembly cancelled");
                break;
            }
            let name = if whole_run {
                self.naming.whole_name()
            } else {
                self.naming.file_name(&span)
            };

            let mut audio = Vec::new();
            for slot in &mut results[span.clone()] {
                if let Some(bytes) = slot.take() {
                    audio.extend_from_slice(&bytes);
                }
            }

            match sink.save(&name, &audio) {
                Ok(()) => {
                    debug!(
                        artifact = %name,
                        first = span.start(),
                        last = span.end(),
                        bytes = audio.len(),
                        sink = sink.name(),
                        "artifact saved"
                    );
                    report.artifacts.push(name);
                }
                Err(e) => {
                    let error = VoxbatchError::Assembly {
                        artifact: name,
                        message: e.to_string(),
                    };
                    warn!("{error}");
                    observer.on_error(&error);
                    report.errors.push(error.to_string());
                }
            }
        }

        if let Err(e) = sink.finish() {
            let error = VoxbatchError::Assembly {
                artifact: sink.name().to_string(),
                message: e.to_string(),
            };
            warn!("{error}");
            observer.on_error(&error);
            report.errors.push(error.to_string());
        }
        report
    }
}
