//! Lazily loaded encoder handle.
//!
//! Loading a sentence encoder takes seconds (and a download the first
//! time), so the handle defers it to the first request. Concurrent callers
//! during the load block on the same initialization; the outcome, success
//! or failure, is cached for the lifetime of the handle.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::error::{TransferError, TransferResult};
use crate::vector::{
    EmbeddingGenerator, FastEmbedGenerator, HashEmbeddingGenerator, ModelChoice, VectorError,
    default_models_dir, parse_embedding_model,
};

/// Default bound on encoder initialization, download included.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(300);

type Loader = dyn Fn() -> Result<Arc<dyn EmbeddingGenerator>, VectorError> + Send + Sync;

/// How to construct the encoder on first use.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub model: String,
    /// Model download directory; the user cache directory when `None`.
    pub cache_dir: Option<PathBuf>,
    pub load_timeout: Duration,
    pub show_download_progress: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model: crate::vector::DEFAULT_MODEL_NAME.to_string(),
            cache_dir: None,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            show_download_progress: false,
        }
    }
}

/// Owned, init-once handle to the sentence encoder.
///
/// Pass it explicitly to build and match operations. Tests substitute a
/// deterministic generator through [`EncoderHandle::from_generator`].
pub struct EncoderHandle {
    model: String,
    timeout: Duration,
    loader: Arc<Loader>,
    cell: OnceLock<Result<Arc<dyn EmbeddingGenerator>, String>>,
}

impl fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderHandle")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl EncoderHandle {
    /// Creates a handle that loads the configured model on first use.
    pub fn new(config: EncoderConfig) -> Self {
        let model = config.model.clone();
        let timeout = config.load_timeout;
        let loader = move || -> Result<Arc<dyn EmbeddingGenerator>, VectorError> {
            match parse_embedding_model(&config.model)? {
                ModelChoice::Hash => Ok(Arc::new(HashEmbeddingGenerator::new())),
                ModelChoice::FastEmbed(_) => {
                    let cache_dir = config.cache_dir.clone().unwrap_or_else(default_models_dir);
                    Ok(Arc::new(FastEmbedGenerator::new(
                        &config.model,
                        cache_dir,
                        config.show_download_progress,
                    )?))
                }
            }
        };
        Self::with_loader(model, timeout, loader)
    }

    /// Creates a handle around a custom loader.
    pub fn with_loader<F>(model: impl Into<String>, timeout: Duration, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingGenerator>, VectorError> + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            timeout,
            loader: Arc::new(loader),
            cell: OnceLock::new(),
        }
    }

    /// Creates an already-loaded handle.
    pub fn from_generator(generator: Arc<dyn EmbeddingGenerator>) -> Self {
        let model = generator.model_name().to_string();
        let cell = OnceLock::new();
        let _ = cell.set(Ok(Arc::clone(&generator)));
        Self {
            model,
            timeout: DEFAULT_LOAD_TIMEOUT,
            loader: Arc::new(move || Ok(Arc::clone(&generator))),
            cell,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the encoder, loading it on the first call.
    ///
    /// # Errors
    /// [`TransferError::ModelLoad`] if initialization failed or exceeded the
    /// timeout. The failure is cached; later calls return it without retrying.
    pub fn get(&self) -> TransferResult<Arc<dyn EmbeddingGenerator>> {
        match self.cell.get_or_init(|| self.load()) {
            Ok(generator) => Ok(Arc::clone(generator)),
            Err(reason) => Err(TransferError::ModelLoad {
                model: self.model.clone(),
                reason: reason.clone(),
            }),
        }
    }

    /// Whether a load has completed successfully.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some_and(Result::is_ok)
    }

    /// Configured model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Drops the loaded encoder; the next [`get`](Self::get) loads again.
    pub fn unload(&mut self) {
        if self.cell.take().is_some() {
            tracing::debug!("Encoder '{}' unloaded", self.model);
        }
    }

    fn load(&self) -> Result<Arc<dyn EmbeddingGenerator>, String> {
        tracing::info!("Loading embedding model '{}'", self.model);
        let started = Instant::now();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let loader = Arc::clone(&self.loader);
        std::thread::Builder::new()
            .name("transmem-encoder-load".to_string())
            .spawn(move || {
                let _ = tx.send(loader());
            })
            .map_err(|e| format!("failed to spawn loader thread: {e}"))?;

        let result = match rx.recv_timeout(self.timeout) {
            Ok(Ok(generator)) => Ok(generator),
            Ok(Err(e)) => Err(e.to_string()),
            Err(RecvTimeoutError::Timeout) => Err(format!(
                "initialization did not finish within {}s",
                self.timeout.as_secs_f32()
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err("loader thread exited without a result".to_string())
            }
        };

        match &result {
            Ok(generator) => tracing::info!(
                "Embedding model '{}' ready ({}d) in {:.1}s",
                generator.model_name(),
                generator.dimension().get(),
                started.elapsed().as_secs_f32()
            ),
            Err(reason) => tracing::error!("Embedding model '{}' failed: {reason}", self.model),
        }

        result
    }
}
