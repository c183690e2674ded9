//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - systemic failure, the batch was aborted
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::TransferError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Model unavailable, corrupt dictionary or incompatible encoder (code 2)
    BlockingError = 2,

    /// No dictionary has been built yet (code 3)
    NotFound = 3,

    /// Input file could not be used (code 4)
    MalformedInput = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Another rebuild is running; retry later (code 7)
    Busy = 7,

    /// Operation was cancelled (code 8)
    Cancelled = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Convert a `TransferError` to the appropriate exit code.
    pub fn from_error(error: &TransferError) -> Self {
        match error {
            TransferError::IndexUnavailable => ExitCode::NotFound,

            TransferError::ModelLoad { .. }
            | TransferError::DictionaryCorrupt { .. }
            | TransferError::IncompatibleEncoder { .. } => ExitCode::BlockingError,

            TransferError::MalformedInput { .. } => ExitCode::MalformedInput,
            TransferError::FileRead { .. } | TransferError::FileWrite { .. } => ExitCode::IoError,
            TransferError::ConfigError { .. } => ExitCode::ConfigError,
            TransferError::RebuildInProgress => ExitCode::Busy,
            TransferError::Cancelled { .. } => ExitCode::Cancelled,

            _ => ExitCode::GeneralError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - the operation was aborted",
            ExitCode::NotFound => "No dictionary",
            ExitCode::MalformedInput => "Malformed input",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::Busy => "Rebuild in progress",
            ExitCode::Cancelled => "Cancelled",
        }
    }
}
