//! Memory-mapped vector files.
//!
//! Each dictionary partition keeps its embeddings in one `.vec` file that is
//! written once when a generation is built and mapped read-only on load.
//!
//! # Storage Format
//!
//! - Header: magic, version, dimension, vector count, model name length,
//!   then the UTF-8 model name
//! - Records: `u32` vector id followed by `dimension` f32 values, little-endian
//!
//! Vector ids are 1-based and stored in insertion order, so record `i`
//! always carries id `i + 1`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::vector::types::{VectorDimension, VectorError, VectorId};

/// Current storage format version.
const STORAGE_VERSION: u32 = 2;

/// Size of the fixed part of the header in bytes.
const HEADER_SIZE: usize = 20;

/// Longest model name a header may carry.
const MAX_MODEL_NAME_LEN: usize = 1024;

/// Magic bytes to identify vector storage files.
const MAGIC_BYTES: &[u8; 4] = b"TMVC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Number of bytes per vector ID (u32).
const BYTES_PER_ID: usize = 4;

/// Errors specific to vector storage operations.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported vector file version {actual} (expected {expected})")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Read-only view of a vector file.
#[derive(Debug)]
pub struct MmapVectorStorage {
    path: PathBuf,
    mmap: Mmap,
    model_name: String,
    dimension: VectorDimension,
    vector_count: usize,
    data_offset: usize,
}

impl MmapVectorStorage {
    /// Writes `vectors` embedded by `model_name` to a new file at `path`,
    /// replacing any existing file.
    pub fn write(
        path: impl AsRef<Path>,
        model_name: &str,
        dimension: VectorDimension,
        vectors: &[Vec<f32>],
    ) -> Result<(), VectorStorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let count = u32::try_from(vectors.len()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("too many vectors: {}", vectors.len()))
        })?;
        if model_name.len() > MAX_MODEL_NAME_LEN {
            return Err(VectorStorageError::InvalidFormat(format!(
                "model name is {} bytes, limit is {MAX_MODEL_NAME_LEN}",
                model_name.len()
            )));
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&STORAGE_VERSION.to_le_bytes())?;
        writer.write_all(&(dimension.get() as u32).to_le_bytes())?;
        writer.write_all(&count.to_le_bytes())?;
        writer.write_all(&(model_name.len() as u32).to_le_bytes())?;
        writer.write_all(model_name.as_bytes())?;

        for (index, vector) in vectors.iter().enumerate() {
            dimension.validate_vector(vector)?;
            let id = VectorId::from_index(index).ok_or_else(|| {
                VectorStorageError::InvalidFormat(format!("no vector id for index {index}"))
            })?;
            writer.write_all(&id.to_bytes())?;
            for &value in vector {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Opens and validates an existing vector file.
    ///
    /// The header, the file length and the id sequence are all checked, so a
    /// truncated or foreign file is rejected here rather than at query time.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorStorageError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: generation files are immutable once published
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let header = Self::read_header(&mmap)?;

        // Header fields are untrusted; a corrupt file must not overflow here
        let expected_len = dimension_bytes(header.dimension)
            .and_then(|bytes| bytes.checked_add(BYTES_PER_ID))
            .and_then(|record| record.checked_mul(header.vector_count))
            .and_then(|records| records.checked_add(header.data_offset))
            .ok_or_else(|| {
                VectorStorageError::InvalidFormat(format!(
                    "header claims {} vectors of dimension {}",
                    header.vector_count,
                    header.dimension.get()
                ))
            })?;
        if mmap.len() != expected_len {
            return Err(VectorStorageError::InvalidFormat(format!(
                "expected {expected_len} bytes for {} vectors, found {}",
                header.vector_count,
                mmap.len()
            )));
        }

        let storage = Self {
            path,
            mmap,
            model_name: header.model_name,
            dimension: header.dimension,
            vector_count: header.vector_count,
            data_offset: header.data_offset,
        };
        for index in 0..storage.vector_count {
            let stored = storage.id_at(index);
            if stored != VectorId::from_index(index) {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "record {index} has id {:?}",
                    stored.map(|id| id.get())
                )));
            }
        }

        Ok(storage)
    }

    /// Reads a vector by its ID.
    #[must_use]
    pub fn read_vector(&self, id: VectorId) -> Option<Vec<f32>> {
        let index = id.index();
        (index < self.vector_count).then(|| self.vector_at(index))
    }

    /// Reads all vectors in insertion order.
    #[must_use]
    pub fn read_all_vectors(&self) -> Vec<Vec<f32>> {
        (0..self.vector_count).map(|i| self.vector_at(i)).collect()
    }

    /// Returns the number of vectors stored.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.vector_count
    }

    /// Name of the encoder that produced the vectors.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // In bounds for every index below `vector_count`, checked in `open`
    fn record_offset(&self, index: usize) -> usize {
        self.data_offset + index * (BYTES_PER_ID + self.dimension.get() * BYTES_PER_F32)
    }

    fn id_at(&self, index: usize) -> Option<VectorId> {
        let offset = self.record_offset(index);
        VectorId::from_bytes(read_4(&self.mmap, offset))
    }

    fn vector_at(&self, index: usize) -> Vec<f32> {
        let data_offset = self.record_offset(index) + BYTES_PER_ID;
        (0..self.dimension.get())
            .map(|i| f32::from_le_bytes(read_4(&self.mmap, data_offset + i * BYTES_PER_F32)))
            .collect()
    }

    fn read_header(mmap: &Mmap) -> Result<Header, VectorStorageError> {
        if mmap.len() < HEADER_SIZE {
            return Err(VectorStorageError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorStorageError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = u32::from_le_bytes(read_4(mmap, 4));
        if version != STORAGE_VERSION {
            return Err(VectorStorageError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            });
        }
        let dimension = VectorDimension::new(u32::from_le_bytes(read_4(mmap, 8)) as usize)?;
        let vector_count = u32::from_le_bytes(read_4(mmap, 12)) as usize;

        let name_len = u32::from_le_bytes(read_4(mmap, 16)) as usize;
        if name_len > MAX_MODEL_NAME_LEN || mmap.len() < HEADER_SIZE + name_len {
            return Err(VectorStorageError::InvalidFormat(format!(
                "model name length {name_len} does not fit the file"
            )));
        }
        let data_offset = HEADER_SIZE + name_len;
        let model_name = std::str::from_utf8(&mmap[HEADER_SIZE..data_offset])
            .map_err(|e| VectorStorageError::InvalidFormat(format!("model name: {e}")))?
            .to_string();

        Ok(Header {
            model_name,
            dimension,
            vector_count,
            data_offset,
        })
    }
}

struct Header {
    model_name: String,
    dimension: VectorDimension,
    vector_count: usize,
    data_offset: usize,
}

fn dimension_bytes(dimension: VectorDimension) -> Option<usize> {
    dimension.get().checked_mul(BYTES_PER_F32)
}

fn read_4(bytes: &[u8], offset: usize) -> [u8; 4] {
    [
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_vector(dim: usize, seed: f32) -> Vec<f32> {
        (0..dim).map(|i| seed + i as f32 * 0.1).collect()
    }

    #[test]
    fn test_write_then_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whole.vec");
        let dimension = VectorDimension::new(8).unwrap();
        let vectors = vec![
            create_test_vector(8, 1.0),
            create_test_vector(8, 2.0),
            create_test_vector(8, 3.0),
        ];

        MmapVectorStorage::write(&path, "hash", dimension, &vectors).unwrap();
        let storage = MmapVectorStorage::open(&path).unwrap();

        assert_eq!(storage.vector_count(), 3);
        assert_eq!(storage.model_name(), "hash");
        assert_eq!(storage.dimension(), dimension);
        assert_eq!(storage.read_all_vectors(), vectors);
        assert_eq!(
            storage.read_vector(VectorId::new(2).unwrap()),
            Some(vectors[1].clone())
        );
        assert!(storage.read_vector(VectorId::new(4).unwrap()).is_none());
    }

    #[test]
    fn test_empty_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("split.vec");
        MmapVectorStorage::write(&path, "hash", VectorDimension::new(4).unwrap(), &[]).unwrap();
        let storage = MmapVectorStorage::open(&path).unwrap();
        assert_eq!(storage.vector_count(), 0);
    }

    #[test]
    fn test_dimension_mismatch_on_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.vec");
        let result = MmapVectorStorage::write(
            &path,
            "hash",
            VectorDimension::new(4).unwrap(),
            &[vec![0.0; 3]],
        );
        assert!(matches!(
            result,
            Err(VectorStorageError::Vector(VectorError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whole.vec");
        let vectors = vec![create_test_vector(4, 1.0), create_test_vector(4, 2.0)];
        let dimension = VectorDimension::new(4).unwrap();
        MmapVectorStorage::write(&path, "hash", dimension, &vectors).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(
            MmapVectorStorage::open(&path),
            Err(VectorStorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whole.vec");
        MmapVectorStorage::write(&path, "hash", VectorDimension::new(2).unwrap(), &[]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 9;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            MmapVectorStorage::open(&path),
            Err(VectorStorageError::VersionMismatch { actual: 9, .. })
        ));

        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            MmapVectorStorage::open(&path),
            Err(VectorStorageError::InvalidFormat(_))
        ));
    }

    fn write_header(path: &Path, dimension: u32, count: u32, name: &[u8]) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&dimension.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(name);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whole.vec");
        write_header(&path, u32::MAX, u32::MAX, b"hash");

        assert!(matches!(
            MmapVectorStorage::open(&path),
            Err(VectorStorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_model_name_length_past_end_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whole.vec");
        write_header(&path, 4, 0, b"hash");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            MmapVectorStorage::open(&path),
            Err(VectorStorageError::InvalidFormat(_))
        ));
    }
}
