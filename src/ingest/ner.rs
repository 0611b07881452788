use regex::Regex;
use serde::Serialize;

use crate::core::config;

// ---------------------------------------------------------------------------
// Named-entity tagging behind a capability interface. The tagger is a
// deterministic rule-based model; when disabled the capability reports
// Unavailable and every dependent feature degrades instead of failing.
// ---------------------------------------------------------------------------

/// Tagging is CPU-bound - run `extract` inside `spawn_blocking` from async
/// contexts (the watcher does this for the whole parse+chunk+scan step).
const NER_INPUT_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityLabel {
    Person,
    Org,
    Gpe,
}

impl EntityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityLabel::Person => "PERSON",
            EntityLabel::Org => "ORG",
            EntityLabel::Gpe => "GPE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
}

pub enum NerCapability {
    Available(RuleTagger),
    Unavailable,
}

impl NerCapability {
    pub fn from_env() -> Self {
        if config::ner_disabled() {
            tracing::warn!("entity tagger disabled — PII person detection degraded");
            NerCapability::Unavailable
        } else {
            NerCapability::Available(RuleTagger::new())
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, NerCapability::Available(_))
    }

    /// Extract entities; empty when the tagger is unavailable.
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        match self {
            NerCapability::Available(tagger) => tagger.extract(text),
            NerCapability::Unavailable => Vec::new(),
        }
    }

    /// `Some(true)` when a PERSON entity is present, `None` when the tagger
    /// cannot answer at all.
    pub fn has_person(&self, text: &str) -> Option<bool> {
        match self {
            NerCapability::Available(tagger) => Some(
                tagger
                    .extract(text)
                    .iter()
                    .any(|e| e.label == EntityLabel::Person),
            ),
            NerCapability::Unavailable => None,
        }
    }
}

/// Deterministic tagger over title-case token runs: organization suffixes
/// and a place-name gazetteer first, person names as the ≥ 2-word default.
pub struct RuleTagger {
    title_run: Regex,
    honorific: Regex,
}

const ORG_SUFFIXES: &[&str] = &[
    "Inc", "Inc.", "LLC", "Ltd", "Ltd.", "Corp", "Corp.", "GmbH", "AG", "Co", "Co.",
];

const GPE_GAZETTEER: &[&str] = &[
    "London", "Paris", "Berlin", "Madrid", "Rome", "Tokyo", "Stockholm", "Helsinki",
    "Oslo", "Copenhagen", "Amsterdam", "Vienna", "Seattle", "Boston", "Chicago",
    "Austin", "Denver", "New York", "San Francisco", "Los Angeles", "Germany",
    "France", "Spain", "Italy", "Sweden", "Finland", "Norway", "Denmark", "Japan",
    "Canada", "United States", "United Kingdom",
];

impl Default for RuleTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTagger {
    pub fn new() -> Self {
        Self {
            // Runs of two or more capitalized words (not shouting case).
            title_run: Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").unwrap(),
            honorific: Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Prof)\.?\s+([A-Z][a-z]+)\b").unwrap(),
        }
    }

    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let capped: String = text.chars().take(NER_INPUT_CAP).collect();
        let mut seen = std::collections::HashSet::new();
        let mut entities = Vec::new();

        for m in self.title_run.find_iter(&capped) {
            let run = m.as_str().trim();
            let label = classify_run(run);
            let entity = Entity {
                text: run.to_string(),
                label,
            };
            if seen.insert(entity.clone()) {
                entities.push(entity);
            }
        }

        // Honorific-led single names: "Dr Lee", "Ms Novak".
        for cap in self.honorific.captures_iter(&capped) {
            let name = cap[1].to_string();
            let entity = Entity {
                text: name,
                label: EntityLabel::Person,
            };
            if seen.insert(entity.clone()) {
                entities.push(entity);
            }
        }

        entities
    }
}

fn classify_run(run: &str) -> EntityLabel {
    if GPE_GAZETTEER.contains(&run) {
        return EntityLabel::Gpe;
    }
    if let Some(last) = run.split_whitespace().last() {
        if ORG_SUFFIXES.contains(&last) {
            return EntityLabel::Org;
        }
    }
    EntityLabel::Person
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_names_are_tagged() {
        let tagger = RuleTagger::new();
        let entities = tagger.extract("I met Alice Johnson at the meetup yesterday.");
        assert!(entities
            .iter()
            .any(|e| e.text == "Alice Johnson" && e.label == EntityLabel::Person));
    }

    #[test]
    fn honorific_single_names_are_persons() {
        let tagger = RuleTagger::new();
        let entities = tagger.extract("Please forward this to Dr Lee before Friday.");
        assert!(entities
            .iter()
            .any(|e| e.text == "Lee" && e.label == EntityLabel::Person));
    }

    #[test]
    fn org_suffix_wins_over_person() {
        let tagger = RuleTagger::new();
        let entities = tagger.extract("The contract with Acme Widgets Inc is signed.");
        assert!(entities
            .iter()
            .any(|e| e.label == EntityLabel::Org && e.text.ends_with("Inc")));
    }

    #[test]
    fn gazetteer_places_are_gpe() {
        let tagger = RuleTagger::new();
        let entities = tagger.extract("The office moves from New York to Berlin in May.");
        assert!(entities
            .iter()
            .any(|e| e.text == "New York" && e.label == EntityLabel::Gpe));
    }

    #[test]
    fn unavailable_capability_returns_nothing() {
        let cap = NerCapability::Unavailable;
        assert!(cap.extract("Alice Johnson wrote this.").is_empty());
        assert_eq!(cap.has_person("Alice Johnson wrote this."), None);
    }

    #[test]
    fn available_capability_answers_person_question() {
        let cap = NerCapability::Available(RuleTagger::new());
        assert_eq!(cap.has_person("Alice Johnson wrote this."), Some(true));
        assert_eq!(cap.has_person("nothing to see here."), Some(false));
    }
}
