use regex::Regex;
use serde::Serialize;

use crate::ingest::ner::{EntityLabel, NerCapability};

// ---------------------------------------------------------------------------
// PII scanner - two signals, either fires: a fixed regex set for identifier
// patterns, then PERSON entities from the tagger on regex-clean text. The
// tagger being absent degrades precision, never availability.
// ---------------------------------------------------------------------------

pub struct PiiScanner {
    patterns: Vec<(&'static str, Regex)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PiiScan {
    pub pii_detected: bool,
    pub regex_match: Option<String>,
    pub person_entities: Vec<String>,
}

impl Default for PiiScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiScanner {
    pub fn new() -> Self {
        let patterns = vec![
            // National-ID triplet ddd-dd-dddd.
            ("national_id", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
            // 16-digit card numbers with optional separators.
            (
                "card_number",
                Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap(),
            ),
            (
                "medical_term",
                Regex::new(r"(?i)\b(diagnosis|prescription|medical record|dob|date of birth)\b")
                    .unwrap(),
            ),
            // Date-of-birth shapes.
            (
                "dob_shape",
                Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap(),
            ),
        ];
        Self { patterns }
    }

    /// Boolean verdict for a chunk. Regex is evaluated first (cheap); the
    /// tagger only runs on regex-clean text and only when available.
    pub fn has_pii(&self, text: &str, ner: &NerCapability) -> bool {
        if self.patterns.iter().any(|(_, p)| p.is_match(text)) {
            return true;
        }
        ner.has_person(text).unwrap_or(false)
    }

    /// Detailed scan result for the operator PII report.
    pub fn scan(&self, text: &str, ner: &NerCapability) -> PiiScan {
        let regex_match = self
            .patterns
            .iter()
            .find(|(_, p)| p.is_match(text))
            .map(|(name, _)| (*name).to_string());

        let person_entities: Vec<String> = ner
            .extract(text)
            .into_iter()
            .filter(|e| e.label == EntityLabel::Person)
            .map(|e| e.text)
            .collect();

        PiiScan {
            pii_detected: regex_match.is_some() || !person_entities.is_empty(),
            regex_match,
            person_entities,
        }
    }
}
