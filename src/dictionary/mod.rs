//! The translation dictionary: entries, their vectors and the ANN index.
//!
//! A [`Dictionary`] is immutable once built. Rebuilds produce a new
//! generation that replaces the active one as a whole.

mod builder;

pub use builder::{BuildOptions, BuildReport, Conflict, ConflictPolicy, DictionaryBuilder};

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::normalize::CodeMap;
use crate::vector::{Score, VectorDimension, VectorError, VectorIndex};

/// Whether an entry covers a whole cell or a single line of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Whole,
    Split,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => f.write_str("whole"),
            Self::Split => f.write_str("split"),
        }
    }
}

/// Identity of a reference file: its name plus a hash of its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFileId {
    pub name: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
}

impl SourceFileId {
    /// Identifies `content` read from a file called `name`.
    pub fn from_content(name: impl Into<String>, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self {
            name: name.into(),
            content_hash: format!("{:x}", hasher.finalize()),
        }
    }

    /// First 12 hex digits of the content hash, for display.
    #[must_use]
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..self.content_hash.len().min(12)]
    }
}

/// One reusable translation.
///
/// The entry's vector lives in the partition's [`VectorIndex`] at the same
/// position as the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub canonical_source: String,
    /// Canonical translation; its codes are kept separately.
    pub translation: String,
    /// Codes extracted from the raw translation.
    pub translation_codes: CodeMap,
    /// Index into [`Dictionary::built_from`].
    pub source_file: usize,
    /// Data row in the reference file, zero-based, header excluded.
    pub row_index: usize,
    /// Line within the cell; always 0 for whole entries.
    pub line_index: usize,
    pub granularity: Granularity,
}

/// Entries of one granularity and the index over their vectors.
#[derive(Debug, Clone)]
pub struct Partition {
    granularity: Granularity,
    entries: Vec<DictionaryEntry>,
    index: VectorIndex,
}

impl Partition {
    /// Pairs entries with their index.
    ///
    /// # Errors
    /// Fails if the index holds a different number of vectors than there
    /// are entries, or an entry has another granularity.
    pub fn new(
        granularity: Granularity,
        entries: Vec<DictionaryEntry>,
        index: VectorIndex,
    ) -> Result<Self, VectorError> {
        if entries.len() != index.len() {
            return Err(VectorError::InconsistentIndex(format!(
                "{granularity} partition has {} entries but {} vectors",
                entries.len(),
                index.len()
            )));
        }
        if let Some(entry) = entries.iter().find(|e| e.granularity != granularity) {
            return Err(VectorError::InconsistentIndex(format!(
                "{} entry '{}' in {granularity} partition",
                entry.granularity, entry.canonical_source
            )));
        }
        Ok(Self {
            granularity,
            entries,
            index,
        })
    }

    /// An empty partition.
    #[must_use]
    pub fn empty(granularity: Granularity, dimension: VectorDimension) -> Self {
        Self {
            granularity,
            entries: Vec::new(),
            index: VectorIndex::empty(dimension),
        }
    }

    /// Top `k` entries for a unit-normalized query vector.
    ///
    /// Ordered by score descending; equal scores keep insertion order.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(&DictionaryEntry, Score)>, VectorError> {
        Ok(self
            .index
            .search(query, k)?
            .into_iter()
            .filter_map(|(i, score)| self.entries.get(i).map(|entry| (entry, score)))
            .collect())
    }

    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    #[must_use]
    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Vector of the entry at `position`.
    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.index.vector(position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One immutable generation of the dictionary.
#[derive(Debug, Clone)]
pub struct Dictionary {
    generation: u64,
    model_name: String,
    dimension: VectorDimension,
    whole: Partition,
    split: Partition,
    built_from: Vec<SourceFileId>,
    /// Unix seconds, UTC.
    built_at: u64,
}

impl Dictionary {
    /// Assembles a dictionary from its parts.
    ///
    /// # Errors
    /// Fails if either partition's index dimension differs from `dimension`.
    pub fn new(
        model_name: impl Into<String>,
        dimension: VectorDimension,
        whole: Partition,
        split: Partition,
        built_from: Vec<SourceFileId>,
        built_at: u64,
    ) -> Result<Self, VectorError> {
        for partition in [&whole, &split] {
            if partition.index.dimension() != dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: dimension.get(),
                    actual: partition.index.dimension().get(),
                });
            }
        }
        Ok(Self {
            generation: 0,
            model_name: model_name.into(),
            dimension,
            whole,
            split,
            built_from,
            built_at,
        })
    }

    /// Tags the dictionary with the generation it was published as.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    #[must_use]
    pub fn partition(&self, granularity: Granularity) -> &Partition {
        match granularity {
            Granularity::Whole => &self.whole,
            Granularity::Split => &self.split,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn built_from(&self) -> &[SourceFileId] {
        &self.built_from
    }

    #[must_use]
    pub fn built_at(&self) -> u64 {
        self.built_at
    }

    /// Reference file an entry came from.
    #[must_use]
    pub fn source_of(&self, entry: &DictionaryEntry) -> Option<&SourceFileId> {
        self.built_from.get(entry.source_file)
    }

    /// Total entries across both granularities.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.whole.len() + self.split.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::IndexParams;

    fn entry(text: &str, granularity: Granularity) -> DictionaryEntry {
        DictionaryEntry {
            canonical_source: text.to_string(),
            translation: text.to_uppercase(),
            translation_codes: CodeMap::default(),
            source_file: 0,
            row_index: 0,
            line_index: 0,
            granularity,
        }
    }

    #[test]
    fn test_source_file_id_hashes_content() {
        let a = SourceFileId::from_content("a.tsv", b"x\ty\n");
        let b = SourceFileId::from_content("b.tsv", b"x\ty\n");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
        assert_eq!(a.short_hash().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_partition_rejects_count_mismatch() {
        let dim = VectorDimension::new(2).unwrap();
        let index = VectorIndex::build(dim, vec![vec![1.0, 0.0]], &IndexParams::default()).unwrap();
        let result = Partition::new(Granularity::Whole, Vec::new(), index);
        assert!(matches!(result, Err(VectorError::InconsistentIndex(_))));
    }

    #[test]
    fn test_partition_rejects_wrong_granularity() {
        let dim = VectorDimension::new(2).unwrap();
        let index = VectorIndex::build(dim, vec![vec![1.0, 0.0]], &IndexParams::default()).unwrap();
        let result = Partition::new(
            Granularity::Whole,
            vec![entry("a", Granularity::Split)],
            index,
        );
        assert!(matches!(result, Err(VectorError::InconsistentIndex(_))));
    }

    #[test]
    fn test_partition_search_returns_entries() {
        let dim = VectorDimension::new(2).unwrap();
        let index = VectorIndex::build(
            dim,
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            &IndexParams::default(),
        )
        .unwrap();
        let partition = Partition::new(
            Granularity::Split,
            vec![entry("a", Granularity::Split), entry("b", Granularity::Split)],
            index,
        )
        .unwrap();

        let hits = partition.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].0.canonical_source, "b");
        assert!((hits[0].1.get() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dictionary_dimension_check() {
        let dim = VectorDimension::new(2).unwrap();
        let other = VectorDimension::new(3).unwrap();
        let result = Dictionary::new(
            "hash",
            dim,
            Partition::empty(Granularity::Whole, dim),
            Partition::empty(Granularity::Split, other),
            Vec::new(),
            0,
        );
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
    }
}
