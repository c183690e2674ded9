//! Embedding generation for the translation dictionary.
//!
//! This module provides the trait and implementations for turning canonical
//! strings into dense vectors. The production encoder wraps fastembed with a
//! multilingual sentence model; the hashing encoder is a deterministic,
//! download-free stand-in used for tests and offline runs.

use crate::vector::{VECTOR_DIMENSION_384, VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Name accepted by [`parse_embedding_model`] for the hashing encoder.
pub const HASH_MODEL_NAME: &str = "hash";

/// Default multilingual model.
pub const DEFAULT_MODEL_NAME: &str = "ParaphraseMLMiniLML12V2";

/// Trait for generating embeddings from text.
///
/// Implementations of this trait should be thread-safe and
/// capable of handling batch processing efficiently.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    ///
    /// # Returns
    /// A vector of embeddings, one for each input text in the same order, or an error
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Stable model name recorded in dictionary artifacts.
    fn model_name(&self) -> &str;
}

/// Which encoder a model name resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChoice {
    FastEmbed(EmbeddingModel),
    Hash,
}

/// Parse a configured model name.
pub fn parse_embedding_model(name: &str) -> Result<ModelChoice, VectorError> {
    let choice = match name {
        "ParaphraseMLMiniLML12V2" => ModelChoice::FastEmbed(EmbeddingModel::ParaphraseMLMiniLML12V2),
        "MultilingualE5Small" => ModelChoice::FastEmbed(EmbeddingModel::MultilingualE5Small),
        "MultilingualE5Base" => ModelChoice::FastEmbed(EmbeddingModel::MultilingualE5Base),
        "AllMiniLML6V2" => ModelChoice::FastEmbed(EmbeddingModel::AllMiniLML6V2),
        HASH_MODEL_NAME => ModelChoice::Hash,
        other => return Err(VectorError::UnknownModel(other.to_string())),
    };
    Ok(choice)
}

/// Default directory for downloaded model files.
pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("transmem")
        .join("models")
}

/// FastEmbed implementation backed by an ONNX sentence encoder.
///
/// # Performance
/// - Batch processing: ~1-10ms per embedding on average
/// - Memory: 384 * 4 bytes = 1536 bytes per embedding for MiniLM models
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    name: String,
}

impl FastEmbedGenerator {
    /// Create a generator for the named model, downloading it into `cache_dir` if needed.
    ///
    /// # Errors
    /// Returns an error if the model name is unknown or the model fails to initialize.
    pub fn new(
        name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = match parse_embedding_model(name)? {
            ModelChoice::FastEmbed(model) => model,
            ModelChoice::Hash => {
                return Err(VectorError::EmbeddingFailed(
                    "the hash encoder is not a fastembed model".to_string(),
                ));
            }
        };

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Probe the output width instead of hard-coding it per model
        let probe = text_model
            .embed(vec!["probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let width = probe
            .into_iter()
            .next()
            .map(|v| v.len())
            .unwrap_or(VECTOR_DIMENSION_384);

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(width)?,
            name: name.to_string(),
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Deterministic feature-hashing encoder.
///
/// Lowercased words with their character bigrams and trigrams give the
/// fuzzy part of the vector. Words as written and adjacent word pairs keep
/// case and word order apart, so "Hello" and "hello", or "dog bites man"
/// and "man bites dog", do not collapse onto one vector. All features are
/// hashed into a fixed number of signed buckets. Identical text always
/// yields an identical vector, and strings sharing no features land near
/// zero similarity. It does no semantic generalization.
#[derive(Debug, Clone)]
pub struct HashEmbeddingGenerator {
    dimension: VectorDimension,
}

impl Default for HashEmbeddingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HashEmbeddingGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: VectorDimension::dimension_256(),
        }
    }

    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];
        let mut add = |feature: &[u8], weight: f32| {
            let h = fnv1a(feature);
            let bucket = (h % dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign * weight;
        };

        let words: Vec<&str> = text.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            add(format!("c:{word}").as_bytes(), 1.0);

            let previous = if i == 0 { "^" } else { words[i - 1] };
            add(format!("b:{previous} {word}").as_bytes(), 1.0);
        }
        if let Some(last) = words.last() {
            add(format!("b:{last} $").as_bytes(), 1.0);
        }

        for word in words.iter().map(|word| word.to_lowercase()) {
            add(format!("w:{word}").as_bytes(), 1.0);

            let chars: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for n in 2..=3 {
                for gram in chars.windows(n) {
                    let gram: String = gram.iter().collect();
                    add(format!("{n}:{gram}").as_bytes(), 1.0);
                }
            }
        }

        normalize_in_place(&mut embedding);
        embedding
    }
}

impl EmbeddingGenerator for HashEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASH_MODEL_NAME
    }
}

/// 64-bit FNV-1a, stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// Scale a vector to unit length; zero vectors are left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Embed `texts` in chunks of at most `chunk_size`, preserving order.
///
/// Every returned vector is unit-normalized and validated against the
/// generator's dimension.
pub fn embed_texts(
    generator: &dyn EmbeddingGenerator,
    texts: &[&str],
    chunk_size: usize,
) -> Result<Vec<Vec<f32>>, VectorError> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(chunk_size) {
        out.extend(embed_chunk(generator, chunk)?);
    }
    Ok(out)
}

/// Embed a single chunk with count and dimension checks.
pub fn embed_chunk(
    generator: &dyn EmbeddingGenerator,
    texts: &[&str],
) -> Result<Vec<Vec<f32>>, VectorError> {
    let mut vectors = generator.generate_embeddings(texts)?;
    if vectors.len() != texts.len() {
        return Err(VectorError::CountMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        });
    }
    let dimension = generator.dimension();
    for vector in &mut vectors {
        dimension.validate_vector(vector)?;
        normalize_in_place(vector);
    }
    Ok(vectors)
}
