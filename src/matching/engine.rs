//! Turning raw input strings into reused translations.
//!
//! A [`Matcher`] pairs one dictionary snapshot with an encoder. Whole mode
//! looks up the full cell; split mode looks up every line on its own and
//! reassembles the cell with the input's own line breaks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::{CancellationFlag, ProgressSink, Stage};
use crate::dictionary::{Dictionary, DictionaryEntry, Granularity, Partition};
use crate::error::{TransferError, TransferResult};
use crate::normalize::{Normalized, denormalize_with_target, normalize};
use crate::semantic::EncoderHandle;
use crate::storage::DictionaryStore;
use crate::vector::{EmbeddingGenerator, VectorError, embed_texts};

use super::lines::{Line, count_line_breaks, split_lines};
use super::newline::adapt_line_count;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Match the entire cell against whole-cell entries.
    #[default]
    Whole,
    /// Match every line against per-line entries.
    Split,
}

impl MatchMode {
    #[must_use]
    pub fn granularity(self) -> Granularity {
        match self {
            Self::Whole => Granularity::Whole,
            Self::Split => Granularity::Split,
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.granularity(), f)
    }
}

/// What to write for text without an accepted match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    #[default]
    Blank,
    KeepOriginal,
}

impl UnmatchedPolicy {
    fn apply(self, original: &str) -> String {
        match self {
            Self::Blank => String::new(),
            Self::KeepOriginal => original.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    /// Minimum score for accepting a match.
    pub threshold: f32,
    pub mode: MatchMode,
    pub unmatched: UnmatchedPolicy,
    /// Candidates retrieved per lookup; only the best is used for output.
    pub top_k: usize,
    /// Rows per encoder call in [`Matcher::match_batch`].
    pub chunk_size: usize,
    /// Reshape whole-mode translations to the input's line-break count.
    pub adapt_newlines: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: crate::semantic::thresholds::DEFAULT,
            mode: MatchMode::Whole,
            unmatched: UnmatchedPolicy::Blank,
            top_k: 1,
            chunk_size: 64,
            adapt_newlines: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Unmatched,
    /// The row could not be processed; the rest of the batch was.
    Failed(String),
    /// The batch was cancelled before reaching this row.
    Cancelled,
}

/// A dictionary entry retrieved for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub source: String,
    pub translation: String,
    pub score: f32,
}

/// Outcome for one line in split mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineOutcome {
    pub input: String,
    pub separator: String,
    pub matched_source: Option<String>,
    pub translation: Option<String>,
    pub score: f32,
    pub accepted: bool,
    /// Blank or code-only lines are copied through without a lookup.
    pub passthrough: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub query: String,
    pub matched_source: Option<String>,
    /// Best candidate's translation with the query's codes reinserted.
    pub translation: Option<String>,
    pub score: f32,
    /// `score >= threshold`; in split mode, every content line accepted.
    pub accepted: bool,
    /// Text to write into the target cell.
    pub output: String,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<LineOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
}

impl MatchResult {
    fn without_match(query: &str, status: MatchStatus, unmatched: UnmatchedPolicy) -> Self {
        Self {
            query: query.to_string(),
            matched_source: None,
            translation: None,
            score: 0.0,
            accepted: false,
            output: unmatched.apply(query),
            status,
            lines: Vec::new(),
            candidates: Vec::new(),
        }
    }

    fn failed(query: &str, reason: String, unmatched: UnmatchedPolicy) -> Self {
        Self::without_match(query, MatchStatus::Failed(reason), unmatched)
    }

    fn cancelled(query: &str, unmatched: UnmatchedPolicy) -> Self {
        Self::without_match(query, MatchStatus::Cancelled, unmatched)
    }
}

/// Counts of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[MatchResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            match result.status {
                MatchStatus::Matched => summary.matched += 1,
                MatchStatus::Unmatched => summary.unmatched += 1,
                MatchStatus::Failed(_) => summary.failed += 1,
                MatchStatus::Cancelled => summary.cancelled += 1,
            }
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.matched + self.unmatched + self.failed + self.cancelled
    }
}

/// A normalized line and whether it needs a lookup.
struct PreparedLine<'a> {
    line: Line<'a>,
    normalized: Option<Normalized>,
}

enum Prepared<'a> {
    Whole(Normalized),
    Split(Vec<PreparedLine<'a>>),
}

impl Prepared<'_> {
    /// Canonical texts to embed, in lookup order.
    fn texts(&self) -> Vec<&str> {
        match self {
            Self::Whole(n) if n.canonical.is_empty() => Vec::new(),
            Self::Whole(n) => vec![n.canonical.as_str()],
            Self::Split(lines) => lines
                .iter()
                .filter_map(|l| l.normalized.as_ref().map(|n| n.canonical.as_str()))
                .collect(),
        }
    }
}

/// Matches input text against one dictionary generation.
///
/// Holds an `Arc` snapshot, so a concurrent rebuild never changes the
/// dictionary a matcher is reading.
pub struct Matcher {
    dictionary: Arc<Dictionary>,
    generator: Arc<dyn EmbeddingGenerator>,
    options: MatchOptions,
}

impl Matcher {
    /// Checks that `generator` produces vectors comparable with `dictionary`.
    ///
    /// # Errors
    /// [`TransferError::IncompatibleEncoder`] on a model or dimension mismatch.
    pub fn new(
        dictionary: Arc<Dictionary>,
        generator: Arc<dyn EmbeddingGenerator>,
        options: MatchOptions,
    ) -> TransferResult<Self> {
        if generator.model_name() != dictionary.model_name()
            || generator.dimension() != dictionary.dimension()
        {
            return Err(TransferError::IncompatibleEncoder {
                expected_model: dictionary.model_name().to_string(),
                expected_dimension: dictionary.dimension().get(),
                actual_model: generator.model_name().to_string(),
                actual_dimension: generator.dimension().get(),
            });
        }
        Ok(Self {
            dictionary,
            generator,
            options,
        })
    }

    /// A matcher over the store's active generation.
    ///
    /// # Errors
    /// [`TransferError::IndexUnavailable`] when nothing is loaded, or the
    /// encoder's load error.
    pub fn from_store(
        store: &DictionaryStore,
        encoder: &EncoderHandle,
        options: MatchOptions,
    ) -> TransferResult<Self> {
        let dictionary = store.current()?;
        Self::new(dictionary, encoder.get()?, options)
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    /// Matches a single string.
    ///
    /// Below-threshold results are not errors; an encoder failure yields a
    /// [`MatchStatus::Failed`] result.
    pub fn match_one(&self, raw: &str) -> MatchResult {
        let prepared = self.prepare(raw);
        match self.embed(&prepared.texts()) {
            Ok(vectors) => self.resolve(raw, &prepared, &vectors),
            Err(e) => {
                tracing::warn!("embedding failed for {raw:?}: {e}");
                MatchResult::failed(raw, e.to_string(), self.options.unmatched)
            }
        }
    }

    /// Matches rows in chunks, returning one result per row in input order.
    ///
    /// A chunk whose embedding fails is retried row by row so that only the
    /// failing rows come back [`MatchStatus::Failed`]. After cancellation
    /// the remaining rows come back [`MatchStatus::Cancelled`].
    pub fn match_batch<S: AsRef<str> + Sync>(
        &self,
        rows: &[S],
        cancel: &CancellationFlag,
        progress: &dyn ProgressSink,
    ) -> Vec<MatchResult> {
        let mut results = Vec::with_capacity(rows.len());
        progress.start(Stage::Match, rows.len());

        for chunk in rows.chunks(self.options.chunk_size.max(1)) {
            if cancel.is_cancelled() {
                break;
            }
            results.extend(self.match_chunk(chunk));
            progress.advance(Stage::Match, chunk.len());
        }

        if results.len() < rows.len() {
            tracing::info!(
                "Match cancelled after {} of {} rows",
                results.len(),
                rows.len()
            );
            results.extend(
                rows[results.len()..]
                    .iter()
                    .map(|raw| MatchResult::cancelled(raw.as_ref(), self.options.unmatched)),
            );
        }

        progress.finish(Stage::Match);
        results
    }

    fn match_chunk<S: AsRef<str> + Sync>(&self, chunk: &[S]) -> Vec<MatchResult> {
        let prepared: Vec<Prepared<'_>> = chunk
            .par_iter()
            .map(|raw| self.prepare(raw.as_ref()))
            .collect();

        // Identical texts in a chunk are embedded once
        let mut unique: Vec<&str> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for text in prepared.iter().flat_map(Prepared::texts) {
            positions.entry(text).or_insert_with(|| {
                unique.push(text);
                unique.len() - 1
            });
        }

        match self.embed(&unique) {
            Ok(vectors) => chunk
                .par_iter()
                .zip(prepared.par_iter())
                .map(|(raw, p)| {
                    let row_vectors: Vec<Vec<f32>> = p
                        .texts()
                        .iter()
                        .map(|text| vectors[positions[text]].clone())
                        .collect();
                    self.resolve(raw.as_ref(), p, &row_vectors)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("chunk embedding failed, retrying rows one by one: {e}");
                chunk
                    .iter()
                    .zip(&prepared)
                    .map(|(raw, p)| match self.embed(&p.texts()) {
                        Ok(vectors) => self.resolve(raw.as_ref(), p, &vectors),
                        Err(e) => {
                            tracing::warn!("embedding failed for {:?}: {e}", raw.as_ref());
                            MatchResult::failed(raw.as_ref(), e.to_string(), self.options.unmatched)
                        }
                    })
                    .collect()
            }
        }
    }

    fn prepare<'a>(&self, raw: &'a str) -> Prepared<'a> {
        match self.options.mode {
            MatchMode::Whole => Prepared::Whole(normalize(raw)),
            MatchMode::Split => Prepared::Split(
                split_lines(raw)
                    .into_iter()
                    .map(|line| {
                        let normalized = (!line.is_blank())
                            .then(|| normalize(line.content))
                            .filter(|n| !n.canonical.is_empty());
                        PreparedLine { line, normalized }
                    })
                    .collect(),
            ),
        }
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        embed_texts(self.generator.as_ref(), texts, self.options.chunk_size.max(1) * 4)
    }

    fn resolve(&self, raw: &str, prepared: &Prepared<'_>, vectors: &[Vec<f32>]) -> MatchResult {
        let outcome = match prepared {
            Prepared::Whole(normalized) => self.resolve_whole(raw, normalized, vectors.first()),
            Prepared::Split(lines) => self.resolve_split(raw, lines, vectors),
        };
        outcome.unwrap_or_else(|e| MatchResult::failed(raw, e.to_string(), self.options.unmatched))
    }

    /// Best candidates for `vector`, best first, with their entries.
    fn lookup<'d>(
        &self,
        partition: &'d Partition,
        vector: &[f32],
    ) -> Result<Vec<(&'d DictionaryEntry, Candidate)>, VectorError> {
        Ok(partition
            .search(vector, self.options.top_k.max(1))?
            .into_iter()
            .map(|(entry, score)| {
                let candidate = Candidate {
                    source: entry.canonical_source.clone(),
                    translation: entry.translation.clone(),
                    score: score.get(),
                };
                (entry, candidate)
            })
            .collect())
    }

    fn resolve_whole(
        &self,
        raw: &str,
        normalized: &Normalized,
        vector: Option<&Vec<f32>>,
    ) -> Result<MatchResult, VectorError> {
        let unmatched = self.options.unmatched;
        let Some(vector) = vector else {
            return Ok(MatchResult::without_match(raw, MatchStatus::Unmatched, unmatched));
        };

        let partition = self.dictionary.partition(Granularity::Whole);
        let hits = self.lookup(partition, vector)?;
        let Some((entry, best)) = hits.first() else {
            return Ok(MatchResult::without_match(raw, MatchStatus::Unmatched, unmatched));
        };

        let accepted = best.score >= self.options.threshold;
        let mut translation =
            denormalize_with_target(&entry.translation, &normalized.codes, &entry.translation_codes);
        if self.options.adapt_newlines {
            translation = adapt_line_count(&translation, count_line_breaks(raw.trim_end()));
        }

        tracing::debug!(
            "whole {:?} -> {:?} score {:.4} accepted {accepted}",
            normalized.canonical,
            best.source,
            best.score
        );

        Ok(MatchResult {
            query: raw.to_string(),
            matched_source: Some(entry.canonical_source.clone()),
            output: if accepted {
                translation.clone()
            } else {
                unmatched.apply(raw)
            },
            translation: Some(translation),
            score: best.score,
            accepted,
            status: if accepted {
                MatchStatus::Matched
            } else {
                MatchStatus::Unmatched
            },
            lines: Vec::new(),
            candidates: hits.into_iter().map(|(_, c)| c).collect(),
        })
    }

    fn resolve_split(
        &self,
        raw: &str,
        lines: &[PreparedLine<'_>],
        vectors: &[Vec<f32>],
    ) -> Result<MatchResult, VectorError> {
        let partition = self.dictionary.partition(Granularity::Split);
        let unmatched = self.options.unmatched;
        let mut vectors = vectors.iter();
        let mut outcomes = Vec::with_capacity(lines.len());

        for prepared in lines {
            let line = prepared.line;
            let Some(normalized) = &prepared.normalized else {
                outcomes.push(LineOutcome {
                    input: line.content.to_string(),
                    separator: line.separator.to_string(),
                    matched_source: None,
                    translation: None,
                    score: 0.0,
                    accepted: false,
                    passthrough: true,
                    output: line.content.to_string(),
                });
                continue;
            };

            let best = match vectors.next() {
                Some(vector) => self.lookup(partition, vector)?.into_iter().next(),
                None => None,
            };
            let outcome = match best {
                Some((entry, candidate)) => {
                    let accepted = candidate.score >= self.options.threshold;
                    let translation = denormalize_with_target(
                        &entry.translation,
                        &normalized.codes,
                        &entry.translation_codes,
                    );
                    tracing::debug!(
                        "line {:?} -> {:?} score {:.4} accepted {accepted}",
                        normalized.canonical,
                        candidate.source,
                        candidate.score
                    );
                    LineOutcome {
                        input: line.content.to_string(),
                        separator: line.separator.to_string(),
                        matched_source: Some(candidate.source),
                        output: if accepted {
                            translation.clone()
                        } else {
                            unmatched.apply(line.content)
                        },
                        translation: Some(translation),
                        score: candidate.score,
                        accepted,
                        passthrough: false,
                    }
                }
                None => LineOutcome {
                    input: line.content.to_string(),
                    separator: line.separator.to_string(),
                    matched_source: None,
                    translation: None,
                    score: 0.0,
                    accepted: false,
                    passthrough: false,
                    output: unmatched.apply(line.content),
                },
            };
            outcomes.push(outcome);
        }

        let mut content = outcomes.iter().filter(|l| !l.passthrough).peekable();
        let has_content = content.peek().is_some();
        let score = content.clone().map(|l| l.score).reduce(f32::min).unwrap_or(0.0);
        let accepted = has_content && content.all(|l| l.accepted);

        let matched_source = has_content
            .then(|| join_lines(&outcomes, |l| l.matched_source.as_deref()))
            .flatten();
        let translation = has_content
            .then(|| join_lines(&outcomes, |l| l.translation.as_deref()))
            .flatten();
        let output = join_lines(&outcomes, |l| Some(l.output.as_str())).unwrap_or_default();

        Ok(MatchResult {
            query: raw.to_string(),
            matched_source,
            translation,
            score,
            accepted,
            output,
            status: if accepted {
                MatchStatus::Matched
            } else {
                MatchStatus::Unmatched
            },
            lines: outcomes,
            candidates: Vec::new(),
        })
    }
}

/// Reassembles a cell from per-line text and the input's separators.
///
/// Passthrough lines contribute their input. `None` if `pick` has nothing
/// for some content line.
fn join_lines<'a>(
    outcomes: &'a [LineOutcome],
    pick: impl Fn(&'a LineOutcome) -> Option<&'a str>,
) -> Option<String> {
    let mut out = String::new();
    for line in outcomes {
        let text = if line.passthrough {
            line.input.as_str()
        } else {
            pick(line)?
        };
        out.push_str(text);
        out.push_str(&line.separator);
    }
    Some(out)
}
