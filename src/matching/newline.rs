//! Line-break consistency between source and translation.
//!
//! [`newline_report`] is a read-only diagnostic: it lists rows whose source
//! and target disagree on the number of line breaks. [`adapt_line_count`]
//! reshapes a translation to a given number of breaks and is used by whole
//! matching when `adapt_newlines` is enabled.

use serde::Serialize;

use super::lines::{count_line_breaks, split_lines};

/// A row whose source and translation have different line-break counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewlineMismatch {
    pub row_id: String,
    pub source_breaks: usize,
    pub target_breaks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewlineReport {
    pub rows_checked: usize,
    pub mismatches: Vec<NewlineMismatch>,
}

impl NewlineReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Tab-separated listing with a header row.
    #[must_use]
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("row_id\tsource_breaks\ttarget_breaks\n");
        for m in &self.mismatches {
            out.push_str(&format!(
                "{}\t{}\t{}\n",
                m.row_id.replace(['\t', '\n', '\r'], " "),
                m.source_breaks,
                m.target_breaks
            ));
        }
        out
    }
}

/// Compares line-break counts of `(row_id, source, target)` triples.
///
/// Rows with an empty target are not translated yet and are skipped.
pub fn newline_report<I, R, S, T>(rows: I) -> NewlineReport
where
    I: IntoIterator<Item = (R, S, T)>,
    R: Into<String>,
    S: AsRef<str>,
    T: AsRef<str>,
{
    let mut report = NewlineReport::default();
    for (row_id, source, target) in rows {
        let (source, target) = (source.as_ref(), target.as_ref());
        if target.trim().is_empty() {
            continue;
        }
        report.rows_checked += 1;

        let source_breaks = count_line_breaks(source.trim_end());
        let target_breaks = count_line_breaks(target.trim_end());
        if source_breaks != target_breaks {
            report.mismatches.push(NewlineMismatch {
                row_id: row_id.into(),
                source_breaks,
                target_breaks,
            });
        }
    }
    report
}

/// Reshapes `text` to exactly `breaks` line breaks.
///
/// Surplus lines are joined onto the last kept line with a space; missing
/// lines are appended empty at the end.
#[must_use]
pub fn adapt_line_count(text: &str, breaks: usize) -> String {
    let lines = split_lines(text);
    let have = lines.len() - 1;

    if have == breaks {
        return text.to_string();
    }

    if have < breaks {
        let mut out = text.to_string();
        out.push_str(&"\n".repeat(breaks - have));
        return out;
    }

    let mut out = String::with_capacity(text.len());
    for line in &lines[..breaks] {
        out.push_str(line.content);
        out.push_str(line.separator);
    }
    let tail: Vec<&str> = lines[breaks..]
        .iter()
        .map(|line| line.content.trim())
        .filter(|content| !content.is_empty())
        .collect();
    out.push_str(&tail.join(" "));
    out
}
