use std::collections::HashMap;

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Rank fusion. RRF is rank-only and the default; weighted fusion kicks in
// when the operator moves the weights off 0.5/0.5 and min-max normalizes
// each side's raw scores before mixing.
// ---------------------------------------------------------------------------

/// Reciprocal Rank Fusion: score(id) = Σ 1/(k + rank + 1) over the lists
/// containing id. Ties keep insertion order into the score map.
pub fn rrf_merge(lex_ids: &[Uuid], vec_ids: &[Uuid], k: u32) -> Vec<Uuid> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut scores: HashMap<Uuid, f64> = HashMap::new();

    for list in [lex_ids, vec_ids] {
        for (rank, id) in list.iter().enumerate() {
            let entry = scores.entry(*id).or_insert_with(|| {
                order.push(*id);
                0.0
            });
            *entry += 1.0 / (k as f64 + rank as f64 + 1.0);
        }
    }

    // Stable sort: equal scores keep first-seen order.
    order.sort_by(|a, b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));
    order
}

/// RRF score map, exposed for debugging and tests.
pub fn rrf_scores(lex_ids: &[Uuid], vec_ids: &[Uuid], k: u32) -> HashMap<Uuid, f64> {
    let mut scores: HashMap<Uuid, f64> = HashMap::new();
    for list in [lex_ids, vec_ids] {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += 1.0 / (k as f64 + rank as f64 + 1.0);
        }
    }
    scores
}

/// Weighted score fusion over min-max-normalized lists. An id missing from
/// one side contributes zero there; a constant-score list normalizes to 1.0
/// for every member (never NaN).
pub fn weighted_merge(
    lex_scores: &[(Uuid, f64)],
    vec_scores: &[(Uuid, f64)],
    w_lex: f64,
    w_vec: f64,
) -> Vec<Uuid> {
    let lex_norm = min_max_normalize(lex_scores);
    let vec_norm = min_max_normalize(vec_scores);

    let mut order: Vec<Uuid> = Vec::new();
    let mut combined: HashMap<Uuid, f64> = HashMap::new();
    for (id, s) in &lex_norm {
        order.push(*id);
        combined.insert(*id, w_lex * s);
    }
    for (id, s) in &vec_norm {
        combined
            .entry(*id)
            .and_modify(|c| *c += w_vec * s)
            .or_insert_with(|| {
                order.push(*id);
                w_vec * s
            });
    }

    order.sort_by(|a, b| {
        combined[b]
            .partial_cmp(&combined[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

fn min_max_normalize(scores: &[(Uuid, f64)]) -> Vec<(Uuid, f64)> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    scores
        .iter()
        .map(|(id, s)| {
            let norm = if range > 0.0 { (s - min) / range } else { 1.0 };
            (*id, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn rrf_is_commutative() {
        let pool = ids(4);
        let a = vec![pool[0], pool[1], pool[2], pool[3]];
        let b = vec![pool[1], pool[3]];
        assert_eq!(rrf_merge(&a, &b, 60), rrf_merge(&b, &a, 60));
    }

    #[test]
    fn rrf_prefers_ids_on_both_lists() {
        let pool = ids(4);
        let a = vec![pool[0], pool[1]];
        let b = vec![pool[1], pool[2]];
        let merged = rrf_merge(&a, &b, 60);
        assert_eq!(merged[0], pool[1]);
    }

    #[test]
    fn rrf_output_is_exactly_the_union() {
        let pool = ids(5);
        let a = vec![pool[0], pool[1]];
        let b = vec![pool[1], pool[2]];
        let merged = rrf_merge(&a, &b, 60);
        assert_eq!(merged.len(), 3);
        // An id absent from both lists is absent from the output.
        assert!(!merged.contains(&pool[3]));
        assert!(!merged.contains(&pool[4]));
    }

    #[test]
    fn rrf_scores_match_formula() {
        let pool = ids(2);
        let scores = rrf_scores(&[pool[0]], &[pool[0], pool[1]], 60);
        let expected_0 = 1.0 / 61.0 + 1.0 / 61.0;
        let expected_1 = 1.0 / 62.0;
        assert!((scores[&pool[0]] - expected_0).abs() < 1e-12);
        assert!((scores[&pool[1]] - expected_1).abs() < 1e-12);
    }

    #[test]
    fn weighted_merge_respects_weights() {
        let lex_best = Uuid::new_v4();
        let vec_best = Uuid::new_v4();
        let lex = vec![(lex_best, 10.0), (vec_best, 1.0)];
        let vec_side = vec![(vec_best, 0.99), (lex_best, 0.10)];

        let lex_heavy = weighted_merge(&lex, &vec_side, 0.9, 0.1);
        assert_eq!(lex_heavy[0], lex_best);

        let vec_heavy = weighted_merge(&lex, &vec_side, 0.1, 0.9);
        assert_eq!(vec_heavy[0], vec_best);
    }

    #[test]
    fn constant_list_normalizes_to_one_not_nan() {
        let pool = ids(3);
        let lex = vec![(pool[0], 5.0), (pool[1], 5.0), (pool[2], 5.0)];
        let norm = min_max_normalize(&lex);
        assert!(norm.iter().all(|(_, s)| *s == 1.0));

        let merged = weighted_merge(&lex, &[], 0.7, 0.3);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn missing_side_contributes_zero() {
        let only_lex = Uuid::new_v4();
        let both = Uuid::new_v4();
        let lex = vec![(both, 1.0), (only_lex, 1.0)];
        let vec_side = vec![(both, 1.0)];
        let merged = weighted_merge(&lex, &vec_side, 0.5, 0.5);
        assert_eq!(merged[0], both);
    }
}
