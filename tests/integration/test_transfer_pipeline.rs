//! End to end: reference tables on disk, a published generation, a fresh
//! process-like reload, and a filled output table.

use std::sync::Arc;

use transmem::batch::{ProgressSink, Stage};
use transmem::config::ColumnsConfig;
use transmem::io::{Table, file_key, load_references, resolve_columns};
use transmem::matching::{BatchSummary, MatchMode, MatchOptions, MatchStatus, Matcher};
use transmem::{
    BuildOptions, CancellationFlag, DictionaryStore, EncoderHandle, HashEmbeddingGenerator,
    NoProgress, UnmatchedPolicy,
};

use crate::common::TestWorkspace;

fn publish(workspace: &TestWorkspace, files: &[std::path::PathBuf]) {
    let (sources, failures) = load_references(files, &ColumnsConfig::default());
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");

    let store = workspace.store();
    let outcome = store
        .rebuild(
            &sources,
            &HashEmbeddingGenerator::new(),
            BuildOptions::default(),
            &CancellationFlag::new(),
            Arc::new(NoProgress),
        )
        .unwrap();
    assert_eq!(outcome.dictionary.generation(), 1);
}

fn matcher(workspace: &TestWorkspace, options: MatchOptions) -> Matcher {
    // A new store instance sees only what is on disk
    let store = DictionaryStore::open(workspace.store_root());
    store.load_active().unwrap();
    let encoder = EncoderHandle::from_generator(Arc::new(HashEmbeddingGenerator::new()));
    Matcher::from_store(&store, &encoder, options).unwrap()
}

#[test]
fn test_transfer_fills_target_column() {
    let workspace = TestWorkspace::new();
    let reference = workspace.write_table(
        "ko_en.tsv",
        "id\tsource\ttarget",
        &[
            "greet\t안녕하세요\tHello",
            "loot\t{ItemID}을(를) 획득했습니다\tObtained {ItemID}.",
            "thanks\t감사합니다\tThank you",
        ],
    );
    publish(&workspace, &[reference]);

    let input = workspace.write_table(
        "new.tsv",
        "id\tsource\ttarget",
        &[
            "a\t안녕하세요\t",
            "b\t{ItemID}을(를) 획득했습니다\t",
            "c\txyz\t",
        ],
    );

    let m = matcher(&workspace, MatchOptions::default());
    let mut table = Table::read(&input).unwrap();
    let columns = resolve_columns(
        &table,
        ColumnsConfig::default().resolve(&file_key(&input), ColumnsConfig::DEFAULT_SHEET),
        &input,
        false,
    )
    .unwrap();
    let target = columns.target.unwrap();

    let rows: Vec<String> = (0..table.len())
        .map(|row| table.cell(row, columns.source).to_string())
        .collect();
    let results = m.match_batch(&rows, &CancellationFlag::new(), &NoProgress);
    for (row, result) in results.iter().enumerate() {
        table.set_cell(row, target, result.output.clone());
    }

    let output = workspace.path().join("out.tsv");
    table.write(&output).unwrap();
    let written = Table::read(&output).unwrap();

    assert_eq!(written.cell(0, target), "Hello");
    assert_eq!(written.cell(1, target), "Obtained {ItemID}.");
    assert_eq!(written.cell(2, target), "");

    assert!(results[0].score > 0.999);
    assert!(!results[2].accepted);
    assert_eq!(results[2].status, MatchStatus::Unmatched);

    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.matched, 2);
    assert_eq!(summary.unmatched, 1);
}

#[test]
fn test_split_mode_from_multiline_reference() {
    let workspace = TestWorkspace::new();
    let reference = workspace.write_table(
        "dialog.tsv",
        "source\ttarget",
        &["\"Line1\nLine2\"\t\"Ligne1\nLigne2\""],
    );
    publish(&workspace, &[reference]);

    let options = MatchOptions {
        mode: MatchMode::Split,
        ..MatchOptions::default()
    };
    let m = matcher(&workspace, options);

    let result = m.match_one("Line1\nLine2");
    assert!(result.accepted);
    assert_eq!(result.output, "Ligne1\nLigne2");

    let reordered = m.match_one("Line2\nLine1");
    assert!(reordered.accepted);
    assert_eq!(reordered.output, "Ligne2\nLigne1");
}

#[test]
fn test_keep_original_leaves_source_in_place() {
    let workspace = TestWorkspace::new();
    let reference =
        workspace.write_table("ref.tsv", "source\ttarget", &["안녕하세요\tHello"]);
    publish(&workspace, &[reference]);

    let options = MatchOptions {
        unmatched: UnmatchedPolicy::KeepOriginal,
        ..MatchOptions::default()
    };
    let m = matcher(&workspace, options);
    let results = m.match_batch(&["안녕하세요", "xyz"], &CancellationFlag::new(), &NoProgress);
    assert_eq!(results[0].output, "Hello");
    assert_eq!(results[1].output, "xyz");
}

#[test]
fn test_later_reference_file_wins() {
    let workspace = TestWorkspace::new();
    let v1 = workspace.write_table("v1.tsv", "source\ttarget", &["시작\tBegin"]);
    let v2 = workspace.write_table("v2.tsv", "source\ttarget", &["시작\tStart"]);
    publish(&workspace, &[v1, v2]);

    let m = matcher(&workspace, MatchOptions::default());
    assert_eq!(m.match_one("시작").output, "Start");
}

#[test]
fn test_missing_column_skips_only_that_file() {
    let workspace = TestWorkspace::new();
    let good = workspace.write_table("good.tsv", "source\ttarget", &["a\tA"]);
    let bad = workspace.write_table("bad.tsv", "korean\tenglish", &["b\tB"]);

    let (sources, failures) = load_references(&[good, bad.clone()], &ColumnsConfig::default());
    assert_eq!(sources.len(), 1);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, bad);
    assert_eq!(failures[0].1.status_code(), "MALFORMED_INPUT");
}

/// Trips the flag once the first chunk is done, like a Ctrl-C mid-batch.
struct InterruptAfterFirstChunk(CancellationFlag);

impl ProgressSink for InterruptAfterFirstChunk {
    fn start(&self, _stage: Stage, _total: usize) {}

    fn advance(&self, _stage: Stage, _done: usize) {
        self.0.cancel();
    }

    fn finish(&self, _stage: Stage) {}
}

#[test]
fn test_interrupted_transfer_still_writes_completed_rows() {
    let workspace = TestWorkspace::new();
    let reference = workspace.write_table(
        "ko_en.tsv",
        "source\ttarget",
        &["안녕하세요\tHello", "감사합니다\tThank you"],
    );
    publish(&workspace, &[reference]);

    let options = MatchOptions {
        chunk_size: 1,
        unmatched: UnmatchedPolicy::KeepOriginal,
        ..MatchOptions::default()
    };
    let m = matcher(&workspace, options);

    let input = workspace.write_table(
        "new.tsv",
        "source\ttarget",
        &["안녕하세요\t", "감사합니다\t", "안녕하세요\t"],
    );
    let mut table = Table::read(&input).unwrap();
    let rows: Vec<String> = (0..table.len()).map(|row| table.cell(row, 0).to_string()).collect();

    let cancel = CancellationFlag::new();
    let results = m.match_batch(&rows, &cancel, &InterruptAfterFirstChunk(cancel.clone()));
    for (row, result) in results.iter().enumerate() {
        table.set_cell(row, 1, result.output.clone());
    }
    let output = workspace.path().join("partial.tsv");
    table.write(&output).unwrap();

    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.cancelled, 2);

    let written = Table::read(&output).unwrap();
    assert_eq!(written.len(), 3);
    assert_eq!(written.cell(0, 1), "Hello");
    assert_eq!(written.cell(1, 1), "감사합니다");
    assert_eq!(results[2].status, MatchStatus::Cancelled);
}
