//! Input/Output handling for reference and transfer tables.
//!
//! This module provides:
//! - Tab-delimited table reading and writing
//! - Reference file loading with per-file column mapping
//! - Exit codes for the CLI

pub mod exit_code;
pub mod reference;
pub mod table;

pub use exit_code::ExitCode;
pub use reference::{
    ReferenceRow, ReferenceSource, ResolvedColumns, file_key, load_references, resolve_columns,
};
pub use table::{Table, TableParseError};
