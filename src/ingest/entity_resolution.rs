use serde::Serialize;

// ---------------------------------------------------------------------------
// Entity-resolution scoring. Variant A is names-only Jaro-Winkler; variant B
// folds in email-domain agreement and shared-document volume. The threshold
// sweep runs offline over a labeled pair set; the canary guard keeps
// known-distinct pairs from ever crossing the production threshold.
// ---------------------------------------------------------------------------

/// Merge-candidate and canary threshold used in production.
pub const PRODUCTION_THRESHOLD: f64 = 0.90;

/// Case-folded Jaro-Winkler (prefix weight 0.1 over the first 4 chars).
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase())
}

/// Variant A: name similarity only.
pub fn score_pair_a(name_a: &str, name_b: &str) -> f64 {
    jaro_winkler(name_a, name_b)
}

/// Variant B: name (0.6) + email domain match (0.3) + shared docs (0.1,
/// saturating at 5 documents).
pub fn score_pair_b(
    name_a: &str,
    email_a: &str,
    name_b: &str,
    email_b: &str,
    shared_docs: u32,
) -> f64 {
    let name_score = jaro_winkler(name_a, name_b);
    let domain_a = email_domain(email_a);
    let domain_b = email_domain(email_b);
    let domain_score = if !domain_a.is_empty() && domain_a == domain_b {
        1.0
    } else {
        0.0
    };
    let doc_score = (shared_docs as f64 / 5.0).min(1.0);
    0.6 * name_score + 0.3 * domain_score + 0.1 * doc_score
}

fn email_domain(email: &str) -> String {
    match email.rsplit_once('@') {
        Some((_, domain)) => domain.to_lowercase(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreVariant {
    NamesOnly,
    Combined,
}

/// One labeled pair from the offline evaluation set.
#[derive(Debug, Clone)]
pub struct LabeledPair {
    pub name_a: String,
    pub name_b: String,
    pub email_a: String,
    pub email_b: String,
    pub shared_docs: u32,
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepPoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Sweep candidate thresholds over a labeled set and report
/// precision/recall/F1 per threshold. Used offline to pick
/// `PRODUCTION_THRESHOLD`.
pub fn threshold_sweep(
    pairs: &[LabeledPair],
    thresholds: &[f64],
    variant: ScoreVariant,
) -> Vec<SweepPoint> {
    thresholds
        .iter()
        .map(|&threshold| {
            let (mut tp, mut fp, mut fne) = (0u32, 0u32, 0u32);
            for p in pairs {
                let score = match variant {
                    ScoreVariant::NamesOnly => score_pair_a(&p.name_a, &p.name_b),
                    ScoreVariant::Combined => {
                        score_pair_b(&p.name_a, &p.email_a, &p.name_b, &p.email_b, p.shared_docs)
                    }
                };
                let predicted = score >= threshold;
                match (predicted, p.is_duplicate) {
                    (true, true) => tp += 1,
                    (true, false) => fp += 1,
                    (false, true) => fne += 1,
                    (false, false) => {}
                }
            }
            let precision = if tp + fp > 0 {
                tp as f64 / (tp + fp) as f64
            } else {
                0.0
            };
            let recall = if tp + fne > 0 {
                tp as f64 / (tp + fne) as f64
            } else {
                0.0
            };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            SweepPoint {
                threshold,
                precision,
                recall,
                f1,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Canary guard
// ---------------------------------------------------------------------------

/// Known-distinct pairs that must never score as merge candidates. Any
/// violation is an operator alert and blocks auto-merge.
pub const CANARY_PAIRS: &[CanaryPair] = &[
    CanaryPair {
        name_a: "John Smith",
        email_a: "john@acme.com",
        name_b: "Jane Smith",
        email_b: "jane@contoso.com",
    },
    CanaryPair {
        name_a: "David Lee",
        email_a: "david.lee@acme.com",
        name_b: "Diana Lee",
        email_b: "diana@globex.com",
    },
    CanaryPair {
        name_a: "Chris Park",
        email_a: "chris@initech.com",
        name_b: "Carol Park",
        email_b: "carol@umbrella.org",
    },
    CanaryPair {
        name_a: "Laura Diaz",
        email_a: "laura@acme.com",
        name_b: "Linda Diaz",
        email_b: "linda@contoso.com",
    },
];

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CanaryPair {
    pub name_a: &'static str,
    pub email_a: &'static str,
    pub name_b: &'static str,
    pub email_b: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanaryViolation {
    pub name_a: String,
    pub name_b: String,
    pub score_a: f64,
    pub score_b: f64,
}

/// Score every canary pair under both variants against `threshold`. An
/// empty result means the guard passes.
pub fn check_canary_guard(threshold: f64) -> Vec<CanaryViolation> {
    CANARY_PAIRS
        .iter()
        .filter_map(|pair| {
            let score_a = score_pair_a(pair.name_a, pair.name_b);
            let score_b = score_pair_b(pair.name_a, pair.email_a, pair.name_b, pair.email_b, 0);
            if score_a >= threshold || score_b >= threshold {
                Some(CanaryViolation {
                    name_a: pair.name_a.to_string(),
                    name_b: pair.name_b.to_string(),
                    score_a,
                    score_b,
                })
            } else {
                None
            }
        })
        .collect()
}
