//! Builds a [`Dictionary`] from reference files.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::{CancellationFlag, NoProgress, ProgressSink, Stage};
use crate::dictionary::{Dictionary, DictionaryEntry, Granularity, Partition, SourceFileId};
use crate::error::TransferResult;
use crate::io::{ReferenceRow, ReferenceSource};
use crate::matching::split_lines;
use crate::normalize::{Normalized, normalize};
use crate::vector::{EmbeddingGenerator, IndexParams, VectorIndex, embed_chunk};

/// Maximum number of conflicts and errors kept in a [`BuildReport`].
const MAX_REPORTED: usize = 100;

/// Which translation survives when reference rows disagree on the same
/// canonical source.
///
/// Files are processed in the order given, rows in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The row processed last replaces earlier ones.
    #[default]
    LastFileWins,
    /// The first row seen is kept.
    FirstFileWins,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub conflict_policy: ConflictPolicy,
    /// Texts per encoder call.
    pub chunk_size: usize,
    pub index: IndexParams,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            chunk_size: 256,
            index: IndexParams::default(),
        }
    }
}

/// Two rows that disagree on the translation of one canonical source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub canonical_source: String,
    pub granularity: Granularity,
    pub kept: String,
    pub discarded: String,
    pub kept_file: String,
    pub discarded_file: String,
}

/// Statistics about a dictionary build.
#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    /// Reference files that contributed rows
    pub sources_read: usize,

    pub rows_read: usize,

    /// Rows with an empty source or translation after normalization
    pub rows_skipped: usize,

    /// Rows repeating an existing (source, translation) pair
    pub duplicates: usize,

    /// Conflicts encountered (limited to the first 100)
    pub conflicts: Vec<Conflict>,

    pub conflict_count: usize,

    /// Rows whose source and translation have different line counts
    pub newline_mismatches: usize,

    /// Unterminated delimiters kept as literal text
    pub normalize_warnings: usize,

    pub whole_entries: usize,
    pub split_entries: usize,

    /// Distinct texts sent to the encoder
    pub texts_embedded: usize,

    /// Files that could not be read (limited to first N errors)
    pub errors: Vec<(PathBuf, String)>,

    /// Time elapsed during the build
    pub elapsed: Duration,

    start_time: Option<Instant>,
}

impl BuildReport {
    /// Create a new report and start timing
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop timing and record elapsed time
    pub fn stop_timing(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed = start.elapsed();
            self.start_time = None;
        }
    }

    /// Add an error (limited to first 100 errors)
    pub fn add_error(&mut self, path: PathBuf, error: String) {
        if self.errors.len() < MAX_REPORTED {
            self.errors.push((path, error));
        }
    }

    fn add_conflict(&mut self, conflict: Conflict) {
        self.conflict_count += 1;
        if self.conflicts.len() < MAX_REPORTED {
            self.conflicts.push(conflict);
        }
    }

    /// Total entries across both granularities
    pub fn total_entries(&self) -> usize {
        self.whole_entries + self.split_entries
    }
}

/// One normalized source/translation pair.
struct PreparedPair {
    source: Normalized,
    target: Normalized,
    line_index: usize,
}

/// A reference row after normalization.
struct PreparedRow {
    row_index: usize,
    whole: PreparedPair,
    /// `None` when the line counts of source and translation differ.
    lines: Option<Vec<PreparedPair>>,
}

fn prepare_row(row: &ReferenceRow) -> PreparedRow {
    let whole = PreparedPair {
        source: normalize(&row.source),
        target: normalize(&row.target),
        line_index: 0,
    };

    // Trailing breaks are export noise, not structure
    let source_lines = split_lines(row.source.trim_end());
    let target_lines = split_lines(row.target.trim_end());
    let lines = (source_lines.len() == target_lines.len()).then(|| {
        source_lines
            .iter()
            .zip(&target_lines)
            .enumerate()
            .filter(|(_, (s, t))| !s.is_blank() && !t.is_blank())
            .map(|(line_index, (s, t))| PreparedPair {
                source: normalize(s.content),
                target: normalize(t.content),
                line_index,
            })
            .collect()
    });

    PreparedRow {
        row_index: row.row_index,
        whole,
        lines,
    }
}

/// Entries of one granularity keyed by canonical source, in insertion order.
struct PartitionAccumulator {
    granularity: Granularity,
    entries: Vec<DictionaryEntry>,
    slots: HashMap<String, usize>,
}

impl PartitionAccumulator {
    fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            entries: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// Adds a pair, resolving duplicates and conflicts. Returns `false` if
    /// the pair was empty and skipped.
    fn offer(
        &mut self,
        pair: &PreparedPair,
        source_file: usize,
        row_index: usize,
        policy: ConflictPolicy,
        files: &[SourceFileId],
        report: &mut BuildReport,
    ) -> bool {
        if pair.source.canonical.is_empty() || pair.target.canonical.is_empty() {
            return false;
        }

        let entry = DictionaryEntry {
            canonical_source: pair.source.canonical.clone(),
            translation: pair.target.canonical.clone(),
            translation_codes: pair.target.codes.clone(),
            source_file,
            row_index,
            line_index: pair.line_index,
            granularity: self.granularity,
        };

        match self.slots.entry(entry.canonical_source.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(self.entries.len());
                self.entries.push(entry);
            }
            Entry::Occupied(occupied) => {
                let existing = &mut self.entries[*occupied.get()];
                if existing.translation == entry.translation {
                    report.duplicates += 1;
                    return true;
                }

                let file_name = |index: usize| {
                    files.get(index).map(|f| f.name.clone()).unwrap_or_default()
                };
                let (kept, discarded) = match policy {
                    ConflictPolicy::LastFileWins => (&entry, &*existing),
                    ConflictPolicy::FirstFileWins => (&*existing, &entry),
                };
                tracing::debug!(
                    "conflicting {} translations for '{}': keeping '{}' from {}",
                    self.granularity,
                    entry.canonical_source,
                    kept.translation,
                    file_name(kept.source_file)
                );
                report.add_conflict(Conflict {
                    canonical_source: entry.canonical_source.clone(),
                    granularity: self.granularity,
                    kept: kept.translation.clone(),
                    discarded: discarded.translation.clone(),
                    kept_file: file_name(kept.source_file),
                    discarded_file: file_name(discarded.source_file),
                });

                if policy == ConflictPolicy::LastFileWins {
                    *existing = entry;
                }
            }
        }
        true
    }
}

/// Turns reference rows into an immutable [`Dictionary`].
///
/// Builds are deterministic: the same sources, encoder and options produce
/// the same entries, vectors and index.
pub struct DictionaryBuilder<'a> {
    generator: &'a dyn EmbeddingGenerator,
    options: BuildOptions,
    cancel: CancellationFlag,
    progress: Arc<dyn ProgressSink>,
}

impl<'a> DictionaryBuilder<'a> {
    pub fn new(generator: &'a dyn EmbeddingGenerator, options: BuildOptions) -> Self {
        Self {
            generator,
            options,
            cancel: CancellationFlag::new(),
            progress: Arc::new(NoProgress),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Normalizes, merges, embeds and indexes every row of `sources`.
    ///
    /// # Errors
    /// Fails on cancellation, encoder failure or index construction failure.
    /// Nothing is published by this function; a failed build has no effect.
    pub fn build(&self, sources: &[ReferenceSource]) -> TransferResult<(Dictionary, BuildReport)> {
        let mut report = BuildReport::new();
        let built_from: Vec<SourceFileId> = sources.iter().map(|s| s.id.clone()).collect();

        tracing::info!(
            "Building dictionary from {} reference file(s) with encoder '{}'",
            sources.len(),
            self.generator.model_name()
        );

        let total_rows: usize = sources.iter().map(|s| s.rows.len()).sum();
        self.progress.start(Stage::Normalize, total_rows);

        let mut whole = PartitionAccumulator::new(Granularity::Whole);
        let mut split = PartitionAccumulator::new(Granularity::Split);

        for (file_index, source) in sources.iter().enumerate() {
            self.cancel.check("normalization")?;

            let prepared: Vec<PreparedRow> = source.rows.par_iter().map(prepare_row).collect();
            report.sources_read += 1;
            report.rows_read += prepared.len();

            for row in &prepared {
                report.normalize_warnings +=
                    row.whole.source.warnings.len() + row.whole.target.warnings.len();

                let accepted = whole.offer(
                    &row.whole,
                    file_index,
                    row.row_index,
                    self.options.conflict_policy,
                    &built_from,
                    &mut report,
                );
                if !accepted {
                    report.rows_skipped += 1;
                    continue;
                }

                match &row.lines {
                    Some(lines) => {
                        for line in lines {
                            split.offer(
                                line,
                                file_index,
                                row.row_index,
                                self.options.conflict_policy,
                                &built_from,
                                &mut report,
                            );
                        }
                    }
                    None => report.newline_mismatches += 1,
                }
            }
            self.progress.advance(Stage::Normalize, prepared.len());
        }
        self.progress.finish(Stage::Normalize);

        let dimension = self.generator.dimension();

        let whole_texts: Vec<&str> = whole
            .entries
            .iter()
            .map(|e| e.canonical_source.as_str())
            .collect();
        let whole_vectors = self.embed_all(Stage::EmbedWhole, &whole_texts)?;

        // Lines identical to a whole cell reuse its vector
        let mut split_vectors: Vec<Option<Vec<f32>>> = split
            .entries
            .iter()
            .map(|e| {
                whole
                    .slots
                    .get(&e.canonical_source)
                    .map(|&i| whole_vectors[i].clone())
            })
            .collect();
        let missing: Vec<usize> = (0..split_vectors.len())
            .filter(|&i| split_vectors[i].is_none())
            .collect();
        let missing_texts: Vec<&str> = missing
            .iter()
            .map(|&i| split.entries[i].canonical_source.as_str())
            .collect();
        let embedded = self.embed_all(Stage::EmbedSplit, &missing_texts)?;
        for (i, vector) in missing.into_iter().zip(embedded) {
            split_vectors[i] = Some(vector);
        }
        let split_vectors: Vec<Vec<f32>> = split_vectors.into_iter().flatten().collect();

        report.texts_embedded = whole_texts.len() + missing_texts.len();

        self.cancel.check("indexing")?;
        self.progress.start(Stage::BuildIndex, 2);
        let whole_index = VectorIndex::build(dimension, whole_vectors, &self.options.index)?;
        self.progress.advance(Stage::BuildIndex, 1);
        let split_index = VectorIndex::build(dimension, split_vectors, &self.options.index)?;
        self.progress.advance(Stage::BuildIndex, 1);
        self.progress.finish(Stage::BuildIndex);

        report.whole_entries = whole.entries.len();
        report.split_entries = split.entries.len();

        let dictionary = Dictionary::new(
            self.generator.model_name(),
            dimension,
            Partition::new(Granularity::Whole, whole.entries, whole_index)?,
            Partition::new(Granularity::Split, split.entries, split_index)?,
            built_from,
            chrono::Utc::now().timestamp().max(0) as u64,
        )?;

        report.stop_timing();
        tracing::info!(
            "Built dictionary: {} whole, {} split entries ({} conflicts, {} duplicates) in {:.2}s",
            report.whole_entries,
            report.split_entries,
            report.conflict_count,
            report.duplicates,
            report.elapsed.as_secs_f64()
        );

        Ok((dictionary, report))
    }

    fn embed_all(&self, stage: Stage, texts: &[&str]) -> TransferResult<Vec<Vec<f32>>> {
        self.progress.start(stage, texts.len());
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.options.chunk_size.max(1)) {
            self.cancel.check(&stage.to_string())?;
            vectors.extend(embed_chunk(self.generator, chunk)?);
            self.progress.advance(stage, chunk.len());
        }
        self.progress.finish(stage);
        Ok(vectors)
    }
}
