//! Generation management for the persisted dictionary.
//!
//! ```text
//! <root>/CURRENT                  name of the active generation
//! <root>/generations/gen-000001/  one artifact per generation
//! ```
//!
//! A rebuild writes a complete artifact into a scratch directory, renames it
//! to its generation name and only then replaces `CURRENT`. Readers holding
//! the previous `Arc<Dictionary>` are unaffected by the swap.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::batch::{CancellationFlag, ProgressSink, Stage};
use crate::dictionary::{BuildOptions, BuildReport, Dictionary, DictionaryBuilder};
use crate::error::{ErrorContext, TransferError, TransferResult};
use crate::io::ReferenceSource;
use crate::vector::EmbeddingGenerator;

use super::artifact::{load_artifact, save_artifact};

pub const CURRENT_FILE: &str = "CURRENT";
pub const GENERATIONS_DIR: &str = "generations";
const GENERATION_PREFIX: &str = "gen-";
const SCRATCH_PREFIX: &str = ".tmp-gen-";

/// Directory name of generation `number`.
pub fn generation_name(number: u64) -> String {
    format!("{GENERATION_PREFIX}{number:06}")
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// Result of a successful rebuild.
#[derive(Debug)]
pub struct RebuildOutcome {
    pub dictionary: Arc<Dictionary>,
    pub report: BuildReport,
    pub path: PathBuf,
    /// Old generation directories removed after the swap
    pub pruned: Vec<PathBuf>,
}

/// Owns the on-disk generations and the in-memory active dictionary.
#[derive(Debug)]
pub struct DictionaryStore {
    root: PathBuf,
    keep_generations: usize,
    active: RwLock<Option<Arc<Dictionary>>>,
    rebuild_lock: Mutex<()>,
}

impl DictionaryStore {
    /// Opens the store rooted at `root`. Nothing is loaded yet.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_generations: 2,
            active: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Number of generations kept on disk, the active one included.
    #[must_use]
    pub fn with_keep_generations(mut self, keep: usize) -> Self {
        self.keep_generations = keep.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generations_dir(&self) -> PathBuf {
        self.root.join(GENERATIONS_DIR)
    }

    /// Name recorded in `CURRENT`, or `None` before the first build.
    pub fn active_generation_name(&self) -> TransferResult<Option<String>> {
        let path = self.root.join(CURRENT_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TransferError::FileRead { path, source: e }),
        }
    }

    /// Loads the generation `CURRENT` points to and makes it active.
    ///
    /// # Errors
    /// [`TransferError::IndexUnavailable`] if nothing was ever published,
    /// [`TransferError::DictionaryCorrupt`] if the artifact fails validation.
    pub fn load_active(&self) -> TransferResult<Arc<Dictionary>> {
        let name = self
            .active_generation_name()?
            .ok_or(TransferError::IndexUnavailable)?;
        let dir = self.generations_dir().join(&name);

        let number = parse_generation(&name).ok_or_else(|| TransferError::DictionaryCorrupt {
            path: self.root.join(CURRENT_FILE),
            reason: format!("'{name}' is not a generation name"),
        })?;

        let dictionary = load_artifact(&dir)?;
        if dictionary.generation() != number {
            return Err(TransferError::DictionaryCorrupt {
                path: dir,
                reason: format!(
                    "directory {name} holds generation {}",
                    dictionary.generation()
                ),
            });
        }

        let dictionary = Arc::new(dictionary);
        *self.active.write() = Some(Arc::clone(&dictionary));
        tracing::info!(
            "Loaded dictionary generation {number}: {} entries",
            dictionary.entry_count()
        );
        Ok(dictionary)
    }

    /// Snapshot of the active dictionary.
    ///
    /// The returned `Arc` stays valid across later swaps.
    pub fn current(&self) -> TransferResult<Arc<Dictionary>> {
        self.active
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(TransferError::IndexUnavailable)
    }

    /// The active dictionary, loading it from disk on first use.
    pub fn current_or_load(&self) -> TransferResult<Arc<Dictionary>> {
        match self.current() {
            Ok(dictionary) => Ok(dictionary),
            Err(TransferError::IndexUnavailable) => self.load_active(),
            Err(e) => Err(e),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.active.read().is_some()
    }

    /// Generation numbers and directories on disk, ascending.
    pub fn generations(&self) -> TransferResult<Vec<(u64, PathBuf)>> {
        let dir = self.generations_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransferError::FileRead { path: dir, source: e }),
        };

        let mut generations: Vec<(u64, PathBuf)> = read_dir
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let number = parse_generation(&entry.file_name().to_string_lossy())?;
                Some((number, entry.path()))
            })
            .collect();
        generations.sort_by_key(|(number, _)| *number);
        Ok(generations)
    }

    /// Builds a new generation from `sources` and publishes it.
    ///
    /// Only one rebuild runs at a time; a concurrent call fails immediately
    /// with [`TransferError::RebuildInProgress`]. Readers keep using the
    /// previous generation until the swap. Any failure, cancellation
    /// included, leaves the previous generation active and on disk.
    pub fn rebuild(
        &self,
        sources: &[ReferenceSource],
        generator: &dyn EmbeddingGenerator,
        options: BuildOptions,
        cancel: &CancellationFlag,
        progress: Arc<dyn ProgressSink>,
    ) -> TransferResult<RebuildOutcome> {
        let _guard = self
            .rebuild_lock
            .try_lock()
            .ok_or(TransferError::RebuildInProgress)?;

        let (dictionary, report) = DictionaryBuilder::new(generator, options)
            .with_cancellation(cancel.clone())
            .with_progress(Arc::clone(&progress))
            .build(sources)?;

        cancel.check("persist")?;
        progress.start(Stage::Persist, 1);

        let generations_dir = self.generations_dir();
        fs::create_dir_all(&generations_dir).write_path(&generations_dir)?;

        let number = self
            .generations()?
            .last()
            .map_or(1, |(latest, _)| latest + 1);
        let name = generation_name(number);
        let dictionary = dictionary.with_generation(number);

        // The scratch directory is removed on drop if anything below fails
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&generations_dir)
            .write_path(&generations_dir)?;
        save_artifact(scratch.path(), &dictionary)?;

        let final_dir = generations_dir.join(&name);
        fs::rename(scratch.path(), &final_dir).write_path(&final_dir)?;
        self.write_current(&name)?;

        let dictionary = Arc::new(dictionary);
        *self.active.write() = Some(Arc::clone(&dictionary));
        progress.finish(Stage::Persist);

        tracing::info!(
            "Published dictionary generation {number} ({} entries)",
            dictionary.entry_count()
        );

        let pruned = self.prune(number);

        Ok(RebuildOutcome {
            dictionary,
            report,
            path: final_dir,
            pruned,
        })
    }

    /// Atomically points `CURRENT` at `name`.
    fn write_current(&self, name: &str) -> TransferResult<()> {
        let target = self.root.join(CURRENT_FILE);
        let mut file = tempfile::NamedTempFile::new_in(&self.root).write_path(&self.root)?;
        file.write_all(name.as_bytes()).write_path(file.path())?;
        file.as_file().sync_all().write_path(file.path())?;
        file.persist(&target)
            .map_err(|e| TransferError::FileWrite {
                path: target.clone(),
                source: e.error,
            })?;
        Ok(())
    }

    /// Removes old generations beyond the retention count, never `active`.
    fn prune(&self, active: u64) -> Vec<PathBuf> {
        let generations = match self.generations() {
            Ok(generations) => generations,
            Err(e) => {
                tracing::warn!("Could not list generations for cleanup: {e}");
                return Vec::new();
            }
        };

        let excess = generations.len().saturating_sub(self.keep_generations);
        let mut pruned = Vec::new();
        for (number, path) in generations.into_iter().take(excess) {
            if number == active {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    tracing::debug!("Removed old generation {}", path.display());
                    pruned.push(path);
                }
                Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
            }
        }
        pruned
    }
}
