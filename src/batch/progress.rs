//! Progress reporting for long-running operations.

use std::fmt;

/// Phase of a build or transfer being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ReadReferences,
    Normalize,
    EmbedWhole,
    EmbedSplit,
    BuildIndex,
    Persist,
    Match,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ReadReferences => "Reading references",
            Self::Normalize => "Normalizing",
            Self::EmbedWhole => "Embedding cells",
            Self::EmbedSplit => "Embedding lines",
            Self::BuildIndex => "Building index",
            Self::Persist => "Writing dictionary",
            Self::Match => "Matching",
        };
        f.write_str(label)
    }
}

/// Receives incremental progress.
///
/// Implementations must be cheap; they are called once per chunk.
pub trait ProgressSink: Send + Sync {
    /// A stage starts with `total` units of work.
    fn start(&self, stage: Stage, total: usize);

    /// `done` more units of the current stage finished.
    fn advance(&self, stage: Stage, done: usize);

    /// The stage finished.
    fn finish(&self, stage: Stage);
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _stage: Stage, _total: usize) {}
    fn advance(&self, _stage: Stage, _done: usize) {}
    fn finish(&self, _stage: Stage) {}
}

/// Forwards progress to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn start(&self, stage: Stage, total: usize) {
        tracing::debug!("{stage}: {total} items");
    }

    fn advance(&self, stage: Stage, done: usize) {
        tracing::trace!("{stage}: +{done}");
    }

    fn finish(&self, stage: Stage) {
        tracing::debug!("{stage}: done");
    }
}
