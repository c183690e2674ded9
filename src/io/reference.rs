//! Reference files: previously translated source/target pairs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ColumnMapping, ColumnsConfig};
use crate::dictionary::SourceFileId;
use crate::error::{ErrorContext, TransferError, TransferResult};

use super::table::Table;

/// One translated row of a reference file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub source: String,
    pub target: String,
    /// Data row index, zero-based, header excluded.
    pub row_index: usize,
    /// Value of the identifier column, if one is mapped.
    pub id: Option<String>,
}

impl ReferenceRow {
    /// Identifier for reports: the id column when present, otherwise the
    /// one-based data row number.
    #[must_use]
    pub fn display_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => (self.row_index + 1).to_string(),
        }
    }
}

/// All rows of one reference file.
#[derive(Debug, Clone)]
pub struct ReferenceSource {
    pub id: SourceFileId,
    pub path: PathBuf,
    pub rows: Vec<ReferenceRow>,
}

/// Column positions resolved against one table's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub source: usize,
    pub target: Option<usize>,
    pub id: Option<usize>,
}

/// Resolves `mapping` against the header of `table`.
///
/// The source column is always required. `require_target` makes a
/// missing target column an error as well; the id column is optional.
pub fn resolve_columns(
    table: &Table,
    mapping: &ColumnMapping,
    path: &Path,
    require_target: bool,
) -> TransferResult<ResolvedColumns> {
    let missing = |column: &str| TransferError::MalformedInput {
        path: path.to_path_buf(),
        reason: format!(
            "missing column '{column}' (header: {})",
            table.headers().join(", ")
        ),
    };

    let source = table
        .column(&mapping.source)
        .ok_or_else(|| missing(&mapping.source))?;
    let target = table.column(&mapping.target);
    if require_target && target.is_none() {
        return Err(missing(&mapping.target));
    }
    let id = match &mapping.id {
        Some(name) => Some(table.column(name).ok_or_else(|| missing(name))?),
        None => None,
    };

    Ok(ResolvedColumns { source, target, id })
}

/// File name used for per-file column lookup.
#[must_use]
pub fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl ReferenceSource {
    /// Reads a reference file using the mapping configured for it.
    pub fn load(path: &Path, columns: &ColumnsConfig) -> TransferResult<Self> {
        let bytes = fs::read(path).read_path(path)?;
        let table = Table::parse_bytes(&bytes).map_err(|e| TransferError::MalformedInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let name = file_key(path);
        let mapping = columns.resolve(&name, ColumnsConfig::DEFAULT_SHEET);
        let id = SourceFileId::from_content(name, &bytes);
        Self::from_table(id, path, &table, mapping)
    }

    /// Extracts rows from an already parsed table.
    pub fn from_table(
        id: SourceFileId,
        path: &Path,
        table: &Table,
        mapping: &ColumnMapping,
    ) -> TransferResult<Self> {
        let columns = resolve_columns(table, mapping, path, false)?;
        let Some(target) = columns.target else {
            return Err(TransferError::MalformedInput {
                path: path.to_path_buf(),
                reason: format!(
                    "reference file has no target column '{}' (header: {})",
                    mapping.target,
                    table.headers().join(", ")
                ),
            });
        };

        let rows = (0..table.len())
            .map(|row_index| ReferenceRow {
                source: table.cell(row_index, columns.source).to_string(),
                target: table.cell(row_index, target).to_string(),
                row_index,
                id: columns.id.map(|c| table.cell(row_index, c).to_string()),
            })
            .collect();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            rows,
        })
    }

    /// An in-memory reference source, identified by hashing its pairs.
    pub fn from_pairs<S: AsRef<str>, T: AsRef<str>>(name: &str, pairs: &[(S, T)]) -> Self {
        let mut digest_input = Vec::new();
        let rows = pairs
            .iter()
            .enumerate()
            .map(|(row_index, (source, target))| {
                digest_input.extend_from_slice(source.as_ref().as_bytes());
                digest_input.push(b'\t');
                digest_input.extend_from_slice(target.as_ref().as_bytes());
                digest_input.push(b'\n');
                ReferenceRow {
                    source: source.as_ref().to_string(),
                    target: target.as_ref().to_string(),
                    row_index,
                    id: None,
                }
            })
            .collect();

        Self {
            id: SourceFileId::from_content(name, &digest_input),
            path: PathBuf::from(name),
            rows,
        }
    }
}

/// Loads every reference file, collecting per-file failures instead of
/// stopping at the first one.
pub fn load_references(
    paths: &[PathBuf],
    columns: &ColumnsConfig,
) -> (Vec<ReferenceSource>, Vec<(PathBuf, TransferError)>) {
    let mut sources = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();

    for path in paths {
        match ReferenceSource::load(path, columns) {
            Ok(source) => {
                tracing::debug!("read {} rows from {}", source.rows.len(), path.display());
                sources.push(source);
            }
            Err(e) => {
                tracing::warn!("skipping reference file {}: {e}", path.display());
                failures.push((path.clone(), e));
            }
        }
    }

    (sources, failures)
}
