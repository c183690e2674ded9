//! Checks against the real multilingual encoder.
//!
//! These download the model on first run, so they are ignored by default.

use std::path::PathBuf;
use std::sync::Arc;

use transmem::matching::{MatchOptions, Matcher};
use transmem::semantic::thresholds;
use transmem::vector::DEFAULT_MODEL_NAME;
use transmem::{
    BuildOptions, DictionaryBuilder, EmbeddingGenerator, EncoderConfig, EncoderHandle,
    ReferenceSource,
};

/// Get a unique cache directory for each test to avoid conflicts
fn test_cache_dir(test_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "transmem_test_fastembed_{}_{}",
        test_name,
        std::process::id()
    ))
}

fn encoder(test_name: &str) -> Arc<dyn EmbeddingGenerator> {
    let handle = EncoderHandle::new(EncoderConfig {
        model: DEFAULT_MODEL_NAME.to_string(),
        cache_dir: Some(test_cache_dir(test_name)),
        ..EncoderConfig::default()
    });
    handle.get().unwrap()
}

#[test]
#[ignore = "Downloads the multilingual model - run with --ignored"]
fn test_paraphrase_scores_between_exact_and_unrelated() {
    let generator = encoder("paraphrase");
    let pairs = [("아이템을 획득했습니다", "Item obtained"), ("퀘스트 완료", "Quest complete")];
    let (dictionary, _) = DictionaryBuilder::new(generator.as_ref(), BuildOptions::default())
        .build(&[ReferenceSource::from_pairs("ref.tsv", &pairs)])
        .unwrap();

    let m = Matcher::new(Arc::new(dictionary), generator, MatchOptions::default()).unwrap();

    let exact = m.match_one("아이템을 획득했습니다");
    let paraphrase = m.match_one("아이템을 얻었습니다");
    let unrelated = m.match_one("서버 연결이 끊어졌습니다");

    assert!(exact.score >= thresholds::NEAR_EXACT);
    assert!(paraphrase.score < exact.score);
    assert!(unrelated.score < paraphrase.score);
    assert_eq!(paraphrase.matched_source.as_deref(), Some("아이템을 획득했습니다"));
}

#[test]
#[ignore = "Downloads the multilingual model - run with --ignored"]
fn test_model_dimension_is_384() {
    let generator = encoder("dimension");
    assert_eq!(generator.dimension().get(), 384);
    let vectors = generator.generate_embeddings(&["안녕하세요", "Hello"]).unwrap();
    assert_eq!(vectors.len(), 2);
}
