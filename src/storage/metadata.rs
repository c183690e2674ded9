//! Metadata stored alongside every dictionary generation.
//!
//! `metadata.json` is the human-readable part of an artifact: which encoder
//! built it, how many entries each partition holds and which reference files
//! went into it. Load compares it against the binary parts.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dictionary::{Dictionary, Granularity, SourceFileId};
use crate::error::{ErrorContext, TransferError, TransferResult};

pub const METADATA_FILE: &str = "metadata.json";

/// Metadata for one persisted dictionary generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Version of the artifact format
    pub version: u32,

    pub generation: u64,

    /// Name of the embedding model used
    pub model_name: String,

    /// Dimension of embeddings
    pub dimension: usize,

    pub whole_count: usize,
    pub split_count: usize,

    /// IVF clusters per partition; 0 for an exhaustive index
    #[serde(default)]
    pub whole_clusters: usize,
    #[serde(default)]
    pub split_clusters: usize,

    /// Reference files in processing order
    pub built_from: Vec<SourceFileId>,

    /// Unix timestamp of the build
    pub built_at: u64,
}

impl ArtifactMetadata {
    /// Current artifact format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Describes `dictionary` as it will be written
    pub fn from_dictionary(dictionary: &Dictionary) -> Self {
        let whole = dictionary.partition(Granularity::Whole);
        let split = dictionary.partition(Granularity::Split);
        Self {
            version: Self::CURRENT_VERSION,
            generation: dictionary.generation(),
            model_name: dictionary.model_name().to_string(),
            dimension: dictionary.dimension().get(),
            whole_count: whole.len(),
            split_count: split.len(),
            whole_clusters: whole.index().cluster_count(),
            split_clusters: split.index().cluster_count(),
            built_from: dictionary.built_from().to_vec(),
            built_at: dictionary.built_at(),
        }
    }

    /// Entry count of one partition
    pub fn count(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Whole => self.whole_count,
            Granularity::Split => self.split_count,
        }
    }

    /// Save metadata to a JSON file in `dir`
    pub fn save(&self, dir: &Path) -> TransferResult<()> {
        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TransferError::General(format!("Failed to serialize metadata: {e}")))?;
        fs::write(&path, json).write_path(&path)
    }

    /// Load metadata from `dir`
    ///
    /// A missing, unparsable or too-new file means the generation is unusable.
    pub fn load(dir: &Path) -> TransferResult<Self> {
        let path = dir.join(METADATA_FILE);
        let corrupt = |reason: String| TransferError::DictionaryCorrupt {
            path: path.clone(),
            reason,
        };

        let json = fs::read_to_string(&path)
            .map_err(|e| corrupt(format!("failed to read metadata: {e}")))?;
        let metadata: Self = serde_json::from_str(&json)
            .map_err(|e| corrupt(format!("failed to parse metadata: {e}")))?;

        // Check version compatibility
        if metadata.version > Self::CURRENT_VERSION {
            return Err(corrupt(format!(
                "artifact version {} is newer than supported version {}",
                metadata.version,
                Self::CURRENT_VERSION
            )));
        }

        Ok(metadata)
    }

    /// Check if a metadata file exists in `dir`
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }

    /// Build time formatted in UTC
    pub fn built_at_display(&self) -> String {
        chrono::DateTime::from_timestamp(self.built_at as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| self.built_at.to_string())
    }
}
