//! Error types for the translation transfer engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::vector::{VectorError, VectorStorageError};

/// Main error type for dictionary and matching operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// Encoder could not be initialized. Fatal for the session.
    #[error("Failed to load embedding model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    /// A match was requested but no dictionary generation is active
    #[error("No dictionary is loaded. Build one with 'transmem build' first.")]
    IndexUnavailable,

    /// Unreadable reference/input file or missing required column
    #[error("Malformed input '{path}': {reason}")]
    MalformedInput { path: PathBuf, reason: String },

    /// Persisted artifact failed a consistency check
    #[error("Dictionary at '{path}' is corrupt: {reason}")]
    DictionaryCorrupt { path: PathBuf, reason: String },

    /// Another rebuild holds the rebuild guard
    #[error("A dictionary rebuild is already in progress")]
    RebuildInProgress,

    /// Cooperative cancellation was requested
    #[error("Operation cancelled during {stage}")]
    Cancelled { stage: String },

    /// The loaded encoder does not produce vectors compatible with the dictionary
    #[error(
        "Encoder '{actual_model}' ({actual_dimension}d) does not match dictionary encoder '{expected_model}' ({expected_dimension}d)"
    )]
    IncompatibleEncoder {
        expected_model: String,
        expected_dimension: usize,
        actual_model: String,
        actual_dimension: usize,
    },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    VectorStorage(#[from] VectorStorageError),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl TransferError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::ModelLoad { .. } => "MODEL_LOAD_ERROR",
            Self::IndexUnavailable => "INDEX_UNAVAILABLE",
            Self::MalformedInput { .. } => "MALFORMED_INPUT",
            Self::DictionaryCorrupt { .. } => "DICTIONARY_CORRUPT",
            Self::RebuildInProgress => "REBUILD_IN_PROGRESS",
            Self::Cancelled { .. } => "CANCELLED",
            Self::IncompatibleEncoder { .. } => "INCOMPATIBLE_ENCODER",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::Vector(_) => "VECTOR_ERROR",
            Self::VectorStorage(_) => "VECTOR_STORAGE_ERROR",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Whether the caller may simply retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RebuildInProgress)
    }

    /// Whether the error aborts a whole batch rather than a single row or file
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad { .. }
                | Self::IndexUnavailable
                | Self::DictionaryCorrupt { .. }
                | Self::IncompatibleEncoder { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::ModelLoad { .. } => vec![
                "Check network access for the first model download",
                "Raise encoder.load_timeout_secs for slow machines",
                "Restart the process; model load failures are not retried",
            ],
            Self::IndexUnavailable => vec![
                "Run 'transmem build <reference files>' to create a dictionary",
                "Check dictionary_path in .transmem/settings.toml",
            ],
            Self::DictionaryCorrupt { .. } => vec![
                "Run 'transmem build' to rebuild from the reference files",
                "Reference files are the source of truth; the artifact is only a cache",
            ],
            Self::RebuildInProgress => vec!["Wait for the running rebuild to finish and retry"],
            Self::IncompatibleEncoder { .. } => vec![
                "Set encoder.model to the model the dictionary was built with",
                "Or rebuild the dictionary with the current encoder",
            ],
            Self::MalformedInput { .. } => vec![
                "Check the column mapping under [columns] in settings.toml",
                "Files must be tab-delimited with a header row",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, TransferError>;

    /// Attach a read path to an I/O error
    fn read_path(self, path: &std::path::Path) -> Result<T, TransferError>;

    /// Attach a write path to an I/O error
    fn write_path(self, path: &std::path::Path) -> Result<T, TransferError>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn context(self, msg: &str) -> Result<T, TransferError> {
        self.map_err(|e| TransferError::General(format!("{msg}: {e}")))
    }

    fn read_path(self, path: &std::path::Path) -> Result<T, TransferError> {
        self.map_err(|source| TransferError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_path(self, path: &std::path::Path) -> Result<T, TransferError> {
        self.map_err(|source| TransferError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}
