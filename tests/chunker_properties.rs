//! Invariant checks for the chunker over generated corpora.

use packrat::chunker::{chunk_text, MAX_CHUNK_CHARS};

fn corpus(sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Sentence number {} carries a modest amount of prose.", i))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn every_chunk_respects_the_ceiling() {
    for (target, overlap) in [(64, 0), (200, 30), (512, 50), (5000, 100)] {
        let chunks = chunk_text(&corpus(120), target, overlap);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(
                c.char_count <= MAX_CHUNK_CHARS,
                "target={} overlap={} produced a chunk of {} chars",
                target,
                overlap,
                c.char_count
            );
            assert_eq!(c.char_count, c.text.chars().count());
        }
    }
}

#[test]
fn indices_are_zero_based_and_contiguous() {
    let chunks = chunk_text(&corpus(80), 300, 40);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.index, i);
    }
}

#[test]
fn empty_input_yields_empty_list() {
    assert!(chunk_text("", 512, 50).is_empty());
    assert!(chunk_text(" \n\t ", 512, 50).is_empty());
}

#[test]
fn single_oversized_sentence_becomes_multiple_bounded_chunks() {
    // One sentence with no terminators, well past the ceiling.
    let words = std::iter::repeat("overgrown")
        .take(600)
        .collect::<Vec<_>>()
        .join(" ");
    assert!(words.chars().count() > MAX_CHUNK_CHARS);

    let chunks = chunk_text(&words, 10_000, 0);
    assert!(chunks.len() >= 2);
    for c in &chunks {
        assert!(c.char_count <= MAX_CHUNK_CHARS);
    }
    let recovered: usize = chunks
        .iter()
        .map(|c| c.text.split_whitespace().count())
        .sum();
    assert_eq!(recovered, 600, "no words may be lost to the hard split");
}

#[test]
fn no_text_is_lost_across_chunks() {
    // With zero overlap the chunks partition the sentence stream exactly.
    let text = corpus(100);
    let chunks = chunk_text(&text, 400, 0);
    let rebuilt = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let normalized: Vec<&str> = text.split_whitespace().collect();
    let rebuilt_words: Vec<&str> = rebuilt.split_whitespace().collect();
    assert_eq!(rebuilt_words, normalized);
}

#[test]
fn overlap_grows_total_length() {
    let text = corpus(100);
    let plain: usize = chunk_text(&text, 300, 0).iter().map(|c| c.char_count).sum();
    let overlapped: usize = chunk_text(&text, 300, 60)
        .iter()
        .map(|c| c.char_count)
        .sum();
    assert!(overlapped > plain);
}
