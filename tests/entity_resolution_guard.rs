//! Scorer behavior on a small labeled set plus the canary guard contract.

use packrat::entity_resolution::{
    check_canary_guard, score_pair_a, score_pair_b, threshold_sweep, LabeledPair, ScoreVariant,
    PRODUCTION_THRESHOLD,
};

fn labeled_set() -> Vec<LabeledPair> {
    let pair = |name_a: &str, email_a: &str, name_b: &str, email_b: &str, shared: u32, dup: bool| {
        LabeledPair {
            name_a: name_a.into(),
            email_a: email_a.into(),
            name_b: name_b.into(),
            email_b: email_b.into(),
            shared_docs: shared,
            is_duplicate: dup,
        }
    };
    vec![
        // True duplicates: nickname, initial, exact.
        pair("Jonathan Smith", "jon.smith@acme.com", "Jon Smith", "jsmith@acme.com", 4, true),
        pair("Katherine Wu", "kwu@acme.com", "Kate Wu", "kate.wu@acme.com", 2, true),
        pair("Mary Major", "mary@acme.com", "Mary Major", "mmajor@acme.com", 5, true),
        // True distincts: relatives and strangers.
        pair("John Smith", "john@acme.com", "Jane Smith", "jane@contoso.com", 0, false),
        pair("Alice Archer", "alice@acme.com", "Zebulon Quux", "zq@contoso.com", 0, false),
        pair("David Lee", "david@acme.com", "Diana Lee", "diana@globex.com", 0, false),
    ]
}

#[test]
fn sweep_reports_one_point_per_threshold() {
    let thresholds = [0.70, 0.80, 0.85, 0.90, 0.95];
    let points = threshold_sweep(&labeled_set(), &thresholds, ScoreVariant::Combined);
    assert_eq!(points.len(), thresholds.len());
    for (p, t) in points.iter().zip(thresholds) {
        assert_eq!(p.threshold, t);
        assert!((0.0..=1.0).contains(&p.precision));
        assert!((0.0..=1.0).contains(&p.recall));
    }
}

#[test]
fn recall_never_increases_with_threshold() {
    let points = threshold_sweep(
        &labeled_set(),
        &[0.5, 0.6, 0.7, 0.8, 0.9, 0.99],
        ScoreVariant::NamesOnly,
    );
    for w in points.windows(2) {
        assert!(
            w[1].recall <= w[0].recall,
            "recall must be monotone non-increasing in the threshold"
        );
    }
}

#[test]
fn exact_duplicate_beats_production_threshold() {
    let score = score_pair_b("Mary Major", "mary@acme.com", "Mary Major", "mmajor@acme.com", 5);
    assert!(score >= PRODUCTION_THRESHOLD, "score = {}", score);
}

#[test]
fn canary_list_is_clean_at_the_production_threshold() {
    let violations = check_canary_guard(PRODUCTION_THRESHOLD);
    assert!(violations.is_empty(), "violations: {:?}", violations);
}

#[test]
fn known_distinct_smiths_are_not_candidates_at_090() {
    assert!(score_pair_a("John Smith", "Jane Smith") < 0.90);
    assert!(
        score_pair_b("John Smith", "john@acme.com", "Jane Smith", "jane@contoso.com", 0) < 0.90
    );
}

#[test]
fn lowering_the_threshold_surfaces_violations() {
    // The guard exists precisely because a permissive threshold would merge
    // these pairs.
    assert!(!check_canary_guard(0.60).is_empty());
}
