//! Saving and loading one dictionary generation as a directory of files.
//!
//! ```text
//! metadata.json   version, model, dimension, counts, built_from, built_at
//! entries.bin     entries of both partitions (bincode)
//! whole.vec       vector segment of the whole partition
//! split.vec       vector segment of the split partition
//! index.bin       IVF state of both partitions (bincode)
//! ```
//!
//! Loading either yields a fully consistent [`Dictionary`] or fails with
//! [`TransferError::DictionaryCorrupt`]; nothing is ever partially loaded.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dictionary::{Dictionary, DictionaryEntry, Granularity, Partition};
use crate::error::{ErrorContext, TransferError, TransferResult};
use crate::vector::{IndexState, MmapVectorStorage, VectorDimension, VectorIndex};

use super::metadata::ArtifactMetadata;

pub const ENTRIES_FILE: &str = "entries.bin";
pub const INDEX_FILE: &str = "index.bin";

const GRANULARITIES: [Granularity; 2] = [Granularity::Whole, Granularity::Split];

#[derive(Serialize, Deserialize)]
struct EntriesFile {
    whole: Vec<DictionaryEntry>,
    split: Vec<DictionaryEntry>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    whole: IndexState,
    split: IndexState,
}

/// File name of a partition's vector segment
pub fn vector_file_name(granularity: Granularity) -> String {
    format!("{granularity}.vec")
}

/// Writes every part of `dictionary` into `dir`, creating it if needed.
///
/// Callers write into a scratch directory and publish it afterwards; this
/// function does not make the write atomic on its own.
pub fn save_artifact(dir: &Path, dictionary: &Dictionary) -> TransferResult<()> {
    fs::create_dir_all(dir).write_path(dir)?;

    for granularity in GRANULARITIES {
        let partition = dictionary.partition(granularity);
        MmapVectorStorage::write(
            dir.join(vector_file_name(granularity)),
            dictionary.model_name(),
            dictionary.dimension(),
            partition.index().vectors(),
        )?;
    }

    let entries = EntriesFile {
        whole: dictionary.partition(Granularity::Whole).entries().to_vec(),
        split: dictionary.partition(Granularity::Split).entries().to_vec(),
    };
    write_bincode(&dir.join(ENTRIES_FILE), &entries)?;

    let index = IndexFile {
        whole: dictionary.partition(Granularity::Whole).index().state(),
        split: dictionary.partition(Granularity::Split).index().state(),
    };
    write_bincode(&dir.join(INDEX_FILE), &index)?;

    // Metadata last: a directory without it is never mistaken for a generation
    ArtifactMetadata::from_dictionary(dictionary).save(dir)?;

    tracing::debug!(
        "wrote generation {} to {}",
        dictionary.generation(),
        dir.display()
    );
    Ok(())
}

/// Loads and cross-checks the artifact in `dir`.
pub fn load_artifact(dir: &Path) -> TransferResult<Dictionary> {
    let corrupt = |reason: String| TransferError::DictionaryCorrupt {
        path: dir.to_path_buf(),
        reason,
    };

    let metadata = ArtifactMetadata::load(dir)?;
    let dimension = VectorDimension::new(metadata.dimension)
        .map_err(|e| corrupt(format!("metadata dimension: {e}")))?;

    let mut entries: EntriesFile = read_bincode(&dir.join(ENTRIES_FILE), dir)?;
    let mut index: IndexFile = read_bincode(&dir.join(INDEX_FILE), dir)?;

    let mut partitions = Vec::with_capacity(GRANULARITIES.len());
    for granularity in GRANULARITIES {
        let path = dir.join(vector_file_name(granularity));
        let storage = MmapVectorStorage::open(&path)
            .map_err(|e| corrupt(format!("{}: {e}", path.display())))?;

        if storage.model_name() != metadata.model_name {
            return Err(corrupt(format!(
                "{granularity} vectors were embedded by '{}', metadata says '{}'",
                storage.model_name(),
                metadata.model_name
            )));
        }
        if storage.dimension() != dimension {
            return Err(corrupt(format!(
                "{granularity} vectors have dimension {}, metadata says {}",
                storage.dimension().get(),
                dimension.get()
            )));
        }

        let (part_entries, state) = match granularity {
            Granularity::Whole => (
                std::mem::take(&mut entries.whole),
                std::mem::replace(&mut index.whole, empty_state()),
            ),
            Granularity::Split => (
                std::mem::take(&mut entries.split),
                std::mem::replace(&mut index.split, empty_state()),
            ),
        };

        let expected = metadata.count(granularity);
        if storage.vector_count() != expected || part_entries.len() != expected {
            return Err(corrupt(format!(
                "{granularity} partition: metadata says {expected} entries, found {} entries and {} vectors",
                part_entries.len(),
                storage.vector_count()
            )));
        }
        if let Some(entry) = part_entries
            .iter()
            .find(|e| e.source_file >= metadata.built_from.len())
        {
            return Err(corrupt(format!(
                "entry '{}' refers to unknown source file #{}",
                entry.canonical_source, entry.source_file
            )));
        }

        let vector_index = VectorIndex::from_parts(dimension, storage.read_all_vectors(), state)
            .map_err(|e| corrupt(format!("{granularity} index: {e}")))?;
        let partition = Partition::new(granularity, part_entries, vector_index)
            .map_err(|e| corrupt(e.to_string()))?;
        partitions.push(partition);
    }

    let split = partitions.pop();
    let whole = partitions.pop();
    let (Some(whole), Some(split)) = (whole, split) else {
        return Err(corrupt("missing partition".to_string()));
    };

    let dictionary = Dictionary::new(
        metadata.model_name.clone(),
        dimension,
        whole,
        split,
        metadata.built_from.clone(),
        metadata.built_at,
    )
    .map_err(|e| corrupt(e.to_string()))?
    .with_generation(metadata.generation);

    Ok(dictionary)
}

fn empty_state() -> IndexState {
    IndexState {
        centroids: Vec::new(),
        assignments: Vec::new(),
        n_probe: 1,
    }
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> TransferResult<()> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| TransferError::General(format!("Failed to encode {}: {e}", path.display())))?;
    fs::write(path, bytes).write_path(path)
}

fn read_bincode<T: for<'de> Deserialize<'de>>(path: &Path, dir: &Path) -> TransferResult<T> {
    let corrupt = |reason: String| TransferError::DictionaryCorrupt {
        path: dir.to_path_buf(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| corrupt(format!("{}: {e}", path.display())))?;
    let (value, read) = bincode::serde::decode_from_slice::<T, _>(&bytes, bincode::config::standard())
        .map_err(|e| corrupt(format!("{}: {e}", path.display())))?;
    if read != bytes.len() {
        return Err(corrupt(format!(
            "{}: {} trailing bytes",
            path.display(),
            bytes.len() - read
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{BuildOptions, DictionaryBuilder};
    use crate::io::ReferenceSource;
    use crate::vector::{HashEmbeddingGenerator, IndexParams};
    use tempfile::TempDir;

    fn sample_dictionary(flat_threshold: usize) -> Dictionary {
        let generator = HashEmbeddingGenerator::new();
        let rows: Vec<(String, String)> = (0..40)
            .map(|i| (format!("항목 {i}\n설명 {i}"), format!("Item {i}\nInfo {i}")))
            .collect();
        let options = BuildOptions {
            index: IndexParams {
                flat_threshold,
                ..IndexParams::default()
            },
            ..BuildOptions::default()
        };
        let (dictionary, _) = DictionaryBuilder::new(&generator, options)
            .build(&[ReferenceSource::from_pairs("ref.tsv", &rows)])
            .unwrap();
        dictionary.with_generation(5)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let dictionary = sample_dictionary(16);
        save_artifact(temp_dir.path(), &dictionary).unwrap();

        let loaded = load_artifact(temp_dir.path()).unwrap();
        assert_eq!(loaded.generation(), 5);
        assert_eq!(loaded.model_name(), dictionary.model_name());
        for granularity in GRANULARITIES {
            let original = dictionary.partition(granularity);
            let restored = loaded.partition(granularity);
            assert_eq!(restored.entries(), original.entries());
            assert_eq!(restored.index().vectors(), original.index().vectors());
            assert_eq!(restored.index().state(), original.index().state());
        }
        assert!(!loaded.partition(Granularity::Split).index().is_flat());
    }

    #[test]
    fn test_truncated_vectors_are_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        save_artifact(temp_dir.path(), &sample_dictionary(4096)).unwrap();

        let path = temp_dir.path().join(vector_file_name(Granularity::Whole));
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            load_artifact(temp_dir.path()),
            Err(TransferError::DictionaryCorrupt { .. })
        ));
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        save_artifact(temp_dir.path(), &sample_dictionary(4096)).unwrap();

        let mut metadata = ArtifactMetadata::load(temp_dir.path()).unwrap();
        metadata.whole_count += 1;
        metadata.save(temp_dir.path()).unwrap();

        assert!(matches!(
            load_artifact(temp_dir.path()),
            Err(TransferError::DictionaryCorrupt { .. })
        ));
    }

    #[test]
    fn test_model_mismatch_with_segments_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        save_artifact(temp_dir.path(), &sample_dictionary(4096)).unwrap();

        let mut metadata = ArtifactMetadata::load(temp_dir.path()).unwrap();
        metadata.model_name = "MultilingualE5Small".to_string();
        metadata.save(temp_dir.path()).unwrap();

        match load_artifact(temp_dir.path()) {
            Err(TransferError::DictionaryCorrupt { reason, .. }) => {
                assert!(reason.contains("embedded by 'hash'"), "{reason}");
            }
            other => panic!("Expected DictionaryCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_entries_are_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        save_artifact(temp_dir.path(), &sample_dictionary(4096)).unwrap();
        fs::write(temp_dir.path().join(ENTRIES_FILE), b"not bincode").unwrap();

        assert!(matches!(
            load_artifact(temp_dir.path()),
            Err(TransferError::DictionaryCorrupt { .. })
        ));
    }

    #[test]
    fn test_missing_segment_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        save_artifact(temp_dir.path(), &sample_dictionary(4096)).unwrap();
        fs::remove_file(temp_dir.path().join(vector_file_name(Granularity::Split))).unwrap();

        assert!(matches!(
            load_artifact(temp_dir.path()),
            Err(TransferError::DictionaryCorrupt { .. })
        ));
    }
}
