//! Fusion behavior across the lexical/vector balance, mirroring how the
//! search pipeline picks RRF vs weighted merging.

use packrat::core::config::RuntimeConfig;
use packrat::fusion::{rrf_merge, rrf_scores, weighted_merge};
use uuid::Uuid;

#[test]
fn rrf_is_symmetric_in_its_inputs() {
    let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let lex = vec![ids[0], ids[1], ids[2]];
    let vec_side = vec![ids[1], ids[3], ids[4]];
    assert_eq!(rrf_merge(&lex, &vec_side, 60), rrf_merge(&vec_side, &lex, 60));
}

#[test]
fn id_absent_from_both_lists_is_absent_from_output() {
    let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let merged = rrf_merge(&ids[..2].to_vec(), &ids[1..3].to_vec(), 60);
    assert!(!merged.contains(&ids[3]));
    assert_eq!(merged.len(), 3);
}

#[test]
fn rrf_k_dampens_rank_differences() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    // a is rank 0, b is rank 9 in one list only.
    let list: Vec<Uuid> = std::iter::once(a)
        .chain((0..8).map(|_| Uuid::new_v4()))
        .chain(std::iter::once(b))
        .collect();
    let low_k = rrf_scores(&list, &[], 1);
    let high_k = rrf_scores(&list, &[], 1000);
    let low_ratio = low_k[&a] / low_k[&b];
    let high_ratio = high_k[&a] / high_k[&b];
    assert!(low_ratio > high_ratio, "larger k should flatten the curve");
}

/// A lexically-strong chunk and a semantically-strong chunk: balanced
/// weights keep both near the top; skewed weights pick a side.
#[test]
fn weight_skew_reorders_the_two_champions() {
    let lexical_champion = Uuid::new_v4();
    let semantic_champion = Uuid::new_v4();
    let filler: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    let lex_scores = vec![
        (lexical_champion, 0.95),
        (filler[0], 0.40),
        (semantic_champion, 0.35),
        (filler[1], 0.20),
    ];
    let vec_scores = vec![
        (semantic_champion, 0.92),
        (filler[2], 0.55),
        (lexical_champion, 0.30),
    ];

    let balanced = weighted_merge(&lex_scores, &vec_scores, 0.5, 0.5);
    let top2: Vec<Uuid> = balanced.iter().take(2).copied().collect();
    assert!(top2.contains(&lexical_champion));
    assert!(top2.contains(&semantic_champion));

    let lexical_heavy = weighted_merge(&lex_scores, &vec_scores, 0.9, 0.1);
    assert_eq!(lexical_heavy[0], lexical_champion);

    let semantic_heavy = weighted_merge(&lex_scores, &vec_scores, 0.1, 0.9);
    assert_eq!(semantic_heavy[0], semantic_champion);
}

#[test]
fn default_weights_select_rrf() {
    let cfg = RuntimeConfig::default();
    assert!(!cfg.use_weighted_fusion());

    let mut skewed = RuntimeConfig::default();
    skewed.bm25_weight = 0.9;
    skewed.vector_weight = 0.1;
    assert!(skewed.use_weighted_fusion());
}

#[test]
fn one_sided_weighted_merge_still_ranks() {
    // Vector side empty (degraded query): ordering falls back to lexical.
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let lex = vec![(ids[0], 3.0), (ids[1], 2.0), (ids[2], 1.0)];
    let merged = weighted_merge(&lex, &[], 0.7, 0.3);
    assert_eq!(merged, vec![ids[0], ids[1], ids[2]]);
}
