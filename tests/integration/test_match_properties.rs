//! Properties that hold for any dictionary: self-retrieval, threshold
//! monotonicity and build determinism.

use std::sync::Arc;

use transmem::matching::{MatchMode, MatchOptions, Matcher};
use transmem::vector::IndexParams;
use transmem::{
    BuildOptions, Dictionary, DictionaryBuilder, HashEmbeddingGenerator, ReferenceSource,
};

const ADJECTIVES: [&str; 6] = ["빨간", "파란", "작은", "커다란", "오래된", "새로운"];
const NOUNS: [&str; 7] = ["검", "방패", "물약", "반지", "갑옷", "활", "지팡이"];
const ADJECTIVES_EN: [&str; 6] = ["Red", "Blue", "Small", "Large", "Old", "New"];
const NOUNS_EN: [&str; 7] = ["Sword", "Shield", "Potion", "Ring", "Armor", "Bow", "Staff"];

fn item_pairs() -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (a, a_en) in ADJECTIVES.iter().zip(ADJECTIVES_EN) {
        for (n, n_en) in NOUNS.iter().zip(NOUNS_EN) {
            pairs.push((format!("{a} {n}"), format!("{a_en} {n_en}")));
        }
    }
    pairs
}

/// Clustered build: 42 entries over a flat threshold of 8.
fn clustered_dictionary() -> Dictionary {
    let options = BuildOptions {
        index: IndexParams {
            flat_threshold: 8,
            n_probe: 1,
            ..IndexParams::default()
        },
        ..BuildOptions::default()
    };
    let generator = HashEmbeddingGenerator::new();
    let (dictionary, _) = DictionaryBuilder::new(&generator, options)
        .build(&[ReferenceSource::from_pairs("items.tsv", &item_pairs())])
        .unwrap();
    dictionary
}

fn matcher(dictionary: Dictionary, options: MatchOptions) -> Matcher {
    Matcher::new(
        Arc::new(dictionary),
        Arc::new(HashEmbeddingGenerator::new()),
        options,
    )
    .unwrap()
}

#[test]
fn test_every_entry_retrieves_itself() {
    let m = matcher(clustered_dictionary(), MatchOptions::default());

    for (source, translation) in item_pairs() {
        let result = m.match_one(&source);
        assert_eq!(result.matched_source.as_deref(), Some(source.as_str()));
        assert!(result.accepted, "{source} scored {}", result.score);
        assert_eq!(result.output, translation);
    }
}

#[test]
fn test_acceptance_is_monotonic_in_threshold() {
    let dictionary = clustered_dictionary();
    let queries = ["빨간 검", "빨간 방패 세트", "검", "xyz", "새로운 활", "오래된 지팡이!"];
    let thresholds = [0.0, 0.2, 0.5, 0.8, 0.9, 0.99, 1.0];

    for mode in [MatchMode::Whole, MatchMode::Split] {
        let mut previous: Option<Vec<bool>> = None;
        for threshold in thresholds {
            let options = MatchOptions {
                threshold,
                mode,
                ..MatchOptions::default()
            };
            let m = matcher(dictionary.clone(), options);
            let accepted: Vec<bool> = queries.iter().map(|q| m.match_one(q).accepted).collect();

            if let Some(looser) = &previous {
                for (i, (&now, &before)) in accepted.iter().zip(looser).enumerate() {
                    assert!(
                        !now || before,
                        "{} accepted at {threshold} but not at a lower threshold",
                        queries[i]
                    );
                }
            }
            previous = Some(accepted);
        }
    }
}

#[test]
fn test_rebuilds_give_identical_results() {
    let queries = ["빨간 검", "작은 물약 두 개", "반지", "갑옷 수리"];
    let options = MatchOptions {
        top_k: 3,
        ..MatchOptions::default()
    };
    let first = matcher(clustered_dictionary(), options.clone());
    let second = matcher(clustered_dictionary(), options);

    for query in queries {
        let a = first.match_one(query);
        let b = second.match_one(query);
        assert_eq!(a.matched_source, b.matched_source, "{query}");
        assert_eq!(a.score.to_bits(), b.score.to_bits(), "{query}");
        assert_eq!(a.candidates, b.candidates, "{query}");
    }
}

#[test]
fn test_reordered_and_recased_sources_keep_their_own_translations() {
    let pairs = [
        ("dog bites man", "Chien mord homme"),
        ("man bites dog", "Homme mord chien"),
        ("Hello", "Bonjour"),
        ("hello", "salut"),
    ];
    let generator = HashEmbeddingGenerator::new();
    let (dictionary, report) = DictionaryBuilder::new(&generator, BuildOptions::default())
        .build(&[ReferenceSource::from_pairs("pairs.tsv", &pairs)])
        .unwrap();
    assert_eq!(report.conflict_count, 0);

    let m = matcher(dictionary, MatchOptions::default());
    for (source, translation) in pairs {
        let result = m.match_one(source);
        assert!(result.accepted, "{source} scored {}", result.score);
        assert_eq!(result.matched_source.as_deref(), Some(source));
        assert_eq!(result.output, translation);
    }
}
