//! Tab-delimited tables as exported by spreadsheet tools.
//!
//! Fields may be wrapped in double quotes, in which case they can contain
//! tabs, line breaks and `""` escapes. The first record is the header.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::error::{ErrorContext, TransferError, TransferResult};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableParseError {
    #[error("file is empty; expected a header row")]
    MissingHeader,

    #[error("quoted field starting on line {line} is never closed")]
    UnterminatedQuote { line: usize },

    #[error("file is not valid UTF-8")]
    InvalidUtf8,
}

/// A header row plus data rows.
///
/// Data rows shorter than the header are padded with empty cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    #[must_use]
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Parses raw file bytes, dropping a leading byte-order mark.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, TableParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| TableParseError::InvalidUtf8)?;
        Self::parse(text)
    }

    pub fn parse(text: &str) -> Result<Self, TableParseError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = parse_records(text)?.into_iter();

        let headers = records.next().ok_or(TableParseError::MissingHeader)?;
        let width = headers.len();
        let rows = records
            .map(|mut row| {
                if row.len() < width {
                    row.resize(width, String::new());
                }
                row
            })
            .collect();

        Ok(Self { headers, rows })
    }

    /// Reads and parses a table file.
    ///
    /// Parse failures become [`TransferError::MalformedInput`].
    pub fn read(path: &Path) -> TransferResult<Self> {
        let bytes = fs::read(path).read_path(path)?;
        Self::parse_bytes(&bytes).map_err(|e| TransferError::MalformedInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes the table, quoting fields where needed.
    pub fn write(&self, path: &Path) -> TransferResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).write_path(parent)?;
        }
        let file = fs::File::create(path).write_path(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(self.to_tsv().as_bytes()).write_path(path)?;
        writer.flush().write_path(path)
    }

    /// Serialized form, one record per line.
    #[must_use]
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for record in std::iter::once(&self.headers).chain(&self.rows) {
            for (i, field) in record.iter().enumerate() {
                if i > 0 {
                    out.push('\t');
                }
                push_field(&mut out, field);
            }
            out.push('\n');
        }
        out
    }

    /// Position of the first column named `name`.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Cell text, or `""` when out of range.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map_or("", String::as_str)
    }

    /// Overwrites a cell, growing the row if needed. Out-of-range rows are ignored.
    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        if let Some(cells) = self.rows.get_mut(row) {
            if cells.len() <= column {
                cells.resize(column + 1, String::new());
            }
            cells[column] = value;
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Appends a column to the header and every row, returning its position.
    pub fn add_column(&mut self, name: impl Into<String>) -> usize {
        let position = self.headers.len();
        self.headers.push(name.into());
        for row in &mut self.rows {
            row.resize(position + 1, String::new());
        }
        position
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn push_field(out: &mut String, field: &str) {
    if field.contains(['\t', '\n', '\r', '"']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn parse_records(text: &str) -> Result<Vec<Vec<String>>, TableParseError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    let mut end_record = |record: &mut Vec<String>, field: &mut String| {
        record.push(std::mem::take(field));
        // Blank lines carry no data
        if !(record.len() == 1 && record[0].is_empty()) {
            records.push(std::mem::take(record));
        }
        record.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '"' if field.is_empty() => {
                let start = line;
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            field.push('"');
                        }
                        Some('"') => break,
                        Some(ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            field.push(ch);
                        }
                        None => return Err(TableParseError::UnterminatedQuote { line: start }),
                    }
                }
            }
            '\t' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                end_record(&mut record, &mut field);
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        end_record(&mut record, &mut field);
    }

    Ok(records)
}
