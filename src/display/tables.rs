//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::dictionary::BuildReport;
use crate::matching::{BatchSummary, MatchResult, MatchStatus, NewlineReport};
use crate::storage::ArtifactMetadata;

/// Longest cell text shown before truncation.
const MAX_CELL_CHARS: usize = 60;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        Self { table: new_table() }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn metric_table() -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Metric").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);
    table
}

/// Single-line preview of a cell: line breaks shown as `⏎`, long text cut.
pub fn preview(text: &str) -> String {
    let flat = text.replace("\r\n", "⏎").replace('\n', "⏎");
    if flat.chars().count() <= MAX_CELL_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(MAX_CELL_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Create a summary table for a dictionary build.
pub fn create_build_table(report: &BuildReport) -> String {
    let mut table = metric_table();

    table.add_row(vec!["Reference files", &report.sources_read.to_string()]);
    table.add_row(vec!["Rows read", &report.rows_read.to_string()]);
    table.add_row(vec!["Rows skipped (empty)", &report.rows_skipped.to_string()]);
    table.add_row(vec!["Duplicates", &report.duplicates.to_string()]);
    table.add_row(vec!["Conflicts", &report.conflict_count.to_string()]);
    table.add_row(vec!["Line count mismatches", &report.newline_mismatches.to_string()]);
    table.add_row(vec!["Whole entries", &report.whole_entries.to_string()]);
    table.add_row(vec!["Line entries", &report.split_entries.to_string()]);
    table.add_row(vec!["Texts embedded", &report.texts_embedded.to_string()]);
    table.add_row(vec!["Time", &format!("{:.2?}", report.elapsed)]);

    if !report.errors.is_empty() {
        table.add_row(vec![
            Cell::new("Unreadable files"),
            Cell::new(report.errors.len())
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
        ]);
    }

    table.to_string()
}

/// Conflicting translations resolved during a build.
pub fn create_conflict_table(report: &BuildReport) -> String {
    let mut table = TableBuilder::new().set_headers(vec!["Source", "Kept", "Discarded", "Unit"]);
    for conflict in &report.conflicts {
        table = table.add_row(vec![
            preview(&conflict.canonical_source),
            format!("{} ({})", preview(&conflict.kept), conflict.kept_file),
            format!("{} ({})", preview(&conflict.discarded), conflict.discarded_file),
            conflict.granularity.to_string(),
        ]);
    }
    table.build()
}

/// Create a table describing the active dictionary generation.
pub fn create_info_table(metadata: &ArtifactMetadata) -> String {
    let mut table = metric_table();

    table.add_row(vec!["Generation", &metadata.generation.to_string()]);
    table.add_row(vec!["Model", &metadata.model_name]);
    table.add_row(vec!["Dimension", &metadata.dimension.to_string()]);
    table.add_row(vec![
        "Whole entries",
        &format!("{} ({})", metadata.whole_count, clusters(metadata.whole_clusters)),
    ]);
    table.add_row(vec![
        "Line entries",
        &format!("{} ({})", metadata.split_count, clusters(metadata.split_clusters)),
    ]);
    table.add_row(vec!["Built", &metadata.built_at_display()]);

    for (i, source) in metadata.built_from.iter().enumerate() {
        let label = if i == 0 { "Built from" } else { "" };
        table.add_row(vec![
            label.to_string(),
            format!("{} [{}]", source.name, source.short_hash()),
        ]);
    }

    table.to_string()
}

fn clusters(count: usize) -> String {
    if count == 0 {
        "exhaustive".to_string()
    } else {
        format!("{count} clusters")
    }
}

/// Create a summary table for a transfer run.
pub fn create_transfer_table(summary: &BatchSummary) -> String {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Rows").add_attribute(Attribute::Bold),
    ]);

    table.add_row(vec![Cell::new("Matched"), Cell::new(summary.matched).fg(Color::Green)]);
    table.add_row(vec!["Unmatched".to_string(), summary.unmatched.to_string()]);
    if summary.failed > 0 {
        table.add_row(vec![Cell::new("Failed"), Cell::new(summary.failed).fg(Color::Red)]);
    }
    if summary.cancelled > 0 {
        table.add_row(vec![
            Cell::new("Cancelled"),
            Cell::new(summary.cancelled).fg(Color::Yellow),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL").add_attribute(Attribute::Bold),
        Cell::new(summary.total()).add_attribute(Attribute::Bold),
    ]);

    table.to_string()
}

/// Create a table for a single query and its candidates.
pub fn create_query_table(result: &MatchResult) -> String {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Score").add_attribute(Attribute::Bold),
        Cell::new("Source").add_attribute(Attribute::Bold),
        Cell::new("Translation").add_attribute(Attribute::Bold),
    ]);

    if !result.lines.is_empty() {
        for line in &result.lines {
            let score = if line.passthrough {
                Cell::new("-")
            } else {
                score_cell(line.score, line.accepted)
            };
            table.add_row(vec![
                score,
                Cell::new(preview(&line.input)),
                Cell::new(preview(&line.output)),
            ]);
        }
        return table.to_string();
    }

    for candidate in &result.candidates {
        let accepted = result.accepted && candidate.score >= result.score;
        table.add_row(vec![
            score_cell(candidate.score, accepted),
            Cell::new(preview(&candidate.source)),
            Cell::new(preview(&candidate.translation)),
        ]);
    }

    if result.candidates.is_empty() {
        let reason = match &result.status {
            MatchStatus::Failed(reason) => reason.as_str(),
            _ => "no candidates",
        };
        table.add_row(vec!["-", reason, ""]);
    }

    table.to_string()
}

fn score_cell(score: f32, accepted: bool) -> Cell {
    let color = if accepted { Color::Green } else { Color::Yellow };
    Cell::new(format!("{score:.4}")).fg(color)
}

/// Rows whose source and translation disagree on line breaks.
pub fn create_newline_table(report: &NewlineReport) -> String {
    let mut table =
        TableBuilder::new().set_headers(vec!["Row", "Source breaks", "Target breaks"]);
    for mismatch in &report.mismatches {
        table = table.add_row(vec![
            mismatch.row_id.clone(),
            mismatch.source_breaks.to_string(),
            mismatch.target_breaks.to_string(),
        ]);
    }
    table.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::newline_report;

    #[test]
    fn test_table_builder() {
        let table = TableBuilder::new()
            .set_headers(vec!["Column 1", "Column 2"])
            .add_row(vec!["Value 1".to_string(), "Value 2".to_string()])
            .build();

        assert!(table.contains("Column 1"));
        assert!(table.contains("Value 1"));
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\r\nb\nc"), "a⏎b⏎c");
        let long = "가".repeat(100);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), MAX_CELL_CHARS);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_transfer_table_hides_zero_failures() {
        let summary = BatchSummary {
            matched: 3,
            unmatched: 1,
            failed: 0,
            cancelled: 0,
        };
        let table = create_transfer_table(&summary);
        assert!(table.contains("Matched"));
        assert!(table.contains("TOTAL"));
        assert!(!table.contains("Failed"));
    }

    #[test]
    fn test_newline_table_lists_rows() {
        let report = newline_report(vec![("menu.start", "A\nB", "ab")]);
        let table = create_newline_table(&report);
        assert!(table.contains("menu.start"));
    }
}
