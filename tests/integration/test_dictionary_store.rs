//! Generation publishing, concurrent rebuilds and corruption handling.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use transmem::matching::{MatchOptions, Matcher};
use transmem::{
    BuildOptions, CancellationFlag, DictionaryStore, HashEmbeddingGenerator, NoProgress,
    ReferenceSource, TransferError,
};

use crate::common::{FailingGenerator, GatedGenerator, TestWorkspace, rebuild_from_pairs};

#[test]
fn test_second_rebuild_is_rejected_while_first_runs() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    rebuild_from_pairs(&store, &[("안녕하세요", "Hello")]).unwrap();

    let (gated, entered, release) = GatedGenerator::new();
    let sources = [ReferenceSource::from_pairs("v2.tsv", &[("안녕하세요", "Hi")])];

    std::thread::scope(|scope| {
        let first = scope.spawn(|| {
            store.rebuild(
                &sources,
                &gated,
                BuildOptions::default(),
                &CancellationFlag::new(),
                Arc::new(NoProgress),
            )
        });

        entered
            .recv_timeout(Duration::from_secs(10))
            .expect("first rebuild never reached the encoder");

        let second = rebuild_from_pairs(&store, &[("감사합니다", "Thanks")]);
        assert!(matches!(second, Err(TransferError::RebuildInProgress)));

        // Readers are not blocked by the running rebuild
        let snapshot = store.current().unwrap();
        assert_eq!(snapshot.generation(), 1);
        let matcher = Matcher::new(
            snapshot,
            Arc::new(HashEmbeddingGenerator::new()),
            MatchOptions::default(),
        )
        .unwrap();
        assert_eq!(matcher.match_one("안녕하세요").output, "Hello");

        drop(release);
        let outcome = first.join().unwrap().unwrap();
        assert_eq!(outcome.dictionary.generation(), 2);
    });

    assert_eq!(store.current().unwrap().generation(), 2);
    // The guard is released after the rebuild
    assert!(rebuild_from_pairs(&store, &[("감사합니다", "Thanks")]).is_ok());
}

#[test]
fn test_failed_rebuild_keeps_previous_generation() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    rebuild_from_pairs(&store, &[("안녕하세요", "Hello")]).unwrap();

    let result = store.rebuild(
        &[ReferenceSource::from_pairs("v2.tsv", &[("안녕하세요", "Hi")])],
        &FailingGenerator,
        BuildOptions::default(),
        &CancellationFlag::new(),
        Arc::new(NoProgress),
    );
    assert!(result.is_err());

    assert_eq!(
        store.active_generation_name().unwrap().as_deref(),
        Some("gen-000001")
    );
    assert_eq!(store.generations().unwrap().len(), 1);

    // No scratch directories are left behind
    let leftovers: Vec<_> = fs::read_dir(workspace.store_root().join("generations"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());

    let reopened = DictionaryStore::open(workspace.store_root());
    let dictionary = reopened.load_active().unwrap();
    let matcher = Matcher::new(
        dictionary,
        Arc::new(HashEmbeddingGenerator::new()),
        MatchOptions::default(),
    )
    .unwrap();
    assert_eq!(matcher.match_one("안녕하세요").output, "Hello");
}

#[test]
fn test_truncated_segment_fails_load() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    let outcome = rebuild_from_pairs(&store, &[("안녕하세요", "Hello"), ("감사합니다", "Thanks")])
        .unwrap();

    let segment = outcome.path.join("whole.vec");
    let bytes = fs::read(&segment).unwrap();
    fs::write(&segment, &bytes[..bytes.len() - 7]).unwrap();

    let reopened = DictionaryStore::open(workspace.store_root());
    match reopened.load_active() {
        Err(error @ TransferError::DictionaryCorrupt { .. }) => {
            assert!(error.is_systemic());
            assert!(!error.recovery_suggestions().is_empty());
        }
        other => panic!("Expected DictionaryCorrupt, got {other:?}"),
    }
    assert!(matches!(
        reopened.current(),
        Err(TransferError::IndexUnavailable)
    ));
}

#[test]
fn test_missing_pointer_is_unavailable() {
    let workspace = TestWorkspace::new();
    let store = workspace.store();
    assert!(matches!(
        store.load_active(),
        Err(TransferError::IndexUnavailable)
    ));
}
