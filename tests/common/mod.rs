//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tempfile::TempDir;

use transmem::vector::{VectorDimension, VectorError};
use transmem::{
    BuildOptions, CancellationFlag, DictionaryStore, EmbeddingGenerator, HashEmbeddingGenerator,
    NoProgress, ReferenceSource, TransferResult,
};

/// A scratch directory with helpers for writing tables.
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a tab-separated table; `rows` are already-escaped lines.
    pub fn write_table(&self, name: &str, header: &str, rows: &[&str]) -> PathBuf {
        let mut content = String::from(header);
        content.push('\n');
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        let path = self.dir.path().join(name);
        fs::write(&path, content).expect("Failed to write table");
        path
    }

    pub fn store_root(&self) -> PathBuf {
        self.dir.path().join("dictionary")
    }

    pub fn store(&self) -> DictionaryStore {
        DictionaryStore::open(self.store_root())
    }
}

/// Rebuilds `store` from in-memory pairs with the offline hash encoder.
pub fn rebuild_from_pairs(
    store: &DictionaryStore,
    pairs: &[(&str, &str)],
) -> TransferResult<transmem::storage::RebuildOutcome> {
    store.rebuild(
        &[ReferenceSource::from_pairs("ref.tsv", pairs)],
        &HashEmbeddingGenerator::new(),
        BuildOptions::default(),
        &CancellationFlag::new(),
        Arc::new(NoProgress),
    )
}

/// Hash encoder that pauses inside every call until released.
///
/// `entered` receives one message when the first call starts. Dropping the
/// release sender lets every pending and later call proceed.
pub struct GatedGenerator {
    inner: HashEmbeddingGenerator,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl GatedGenerator {
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(0);
        let generator = Self {
            inner: HashEmbeddingGenerator::new(),
            entered: entered_tx,
            release: release_rx,
        };
        (generator, entered_rx, release_tx)
    }
}

impl EmbeddingGenerator for GatedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let _ = self.entered.try_send(());
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        self.inner.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Hash-compatible encoder that always fails.
pub struct FailingGenerator;

impl EmbeddingGenerator for FailingGenerator {
    fn generate_embeddings(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Err(VectorError::EmbeddingFailed("encoder offline".to_string()))
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::dimension_256()
    }

    fn model_name(&self) -> &str {
        transmem::vector::HASH_MODEL_NAME
    }
}
