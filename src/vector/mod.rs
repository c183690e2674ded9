//! Vector embedding, storage and nearest-neighbour search.
//!
//! # Architecture
//! Each dictionary partition owns a [`VectorIndex`]. Small partitions are
//! searched exhaustively; larger ones use IVFFlat (Inverted File with Flat
//! vectors) indexing with seeded K-means clustering. Vectors are persisted in
//! memory-mapped files and the clustering state alongside them, so loading a
//! dictionary never re-clusters.

mod clustering;
mod embedding;
mod engine;
mod storage;
mod types;

// Re-export core types for public API
pub use clustering::{
    ClusteringError, KMeansResult, assign_to_nearest_centroid, cosine_similarity, kmeans_clustering,
};
pub use embedding::{
    DEFAULT_MODEL_NAME, EmbeddingGenerator, FastEmbedGenerator, HASH_MODEL_NAME,
    HashEmbeddingGenerator, ModelChoice, default_models_dir, embed_chunk, embed_texts,
    normalize_in_place, parse_embedding_model,
};
pub use engine::{
    DEFAULT_FLAT_THRESHOLD, DEFAULT_N_PROBE, DEFAULT_SEED, IndexParams, IndexState, VectorIndex,
};
pub use storage::{MmapVectorStorage, VectorStorageError};
pub use types::{ClusterId, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError, VectorId};
