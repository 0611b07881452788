// ---------------------------------------------------------------------------
// Character-bounded chunker. Splits on sentence boundaries, accumulates
// greedily up to min(target, MAX_CHUNK_CHARS), seeds each chunk with a
// word-aligned tail of the previous one for context continuity.
// ---------------------------------------------------------------------------

/// Hard ceiling on chunk length in characters, sized for the worst-case
/// char/token ratio of any supported language against the embedding model's
/// context window. Applies regardless of the configured target.
pub const MAX_CHUNK_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub char_count: usize,
}

/// Split `text` into overlapping chunks.
///
/// `chunk_size` and `overlap` are in characters and come from the config
/// table at ingest time. Empty or whitespace-only input yields an empty
/// list. Indices are 0-based and contiguous.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let limit = chunk_size.min(MAX_CHUNK_CHARS).max(1);

    // Sentences first; any sentence over the ceiling is hard-split on word
    // boundaries and its pieces feed the normal accumulator.
    let mut units: Vec<String> = Vec::new();
    for sentence in split_sentences(trimmed) {
        if sentence.chars().count() > MAX_CHUNK_CHARS {
            units.extend(hard_split(&sentence, MAX_CHUNK_CHARS));
        } else {
            units.push(sentence);
        }
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for unit in units {
        let unit_chars = unit.chars().count();

        if current_chars > 0 && current_chars + 1 + unit_chars > limit {
            let flushed = std::mem::take(&mut current);
            let flushed_chars = current_chars;
            current_chars = 0;
            chunks.push(Chunk {
                index: chunks.len(),
                text: flushed.clone(),
                char_count: flushed_chars,
            });

            // Seed the next chunk with the tail of the previous one, unless
            // the seed plus this unit would already overflow.
            let tail = overlap_tail(&flushed, overlap);
            let tail_chars = tail.chars().count();
            if tail_chars > 0 && tail_chars + 1 + unit_chars <= limit {
                current = tail;
                current_chars = tail_chars;
            }
        }

        if current_chars > 0 {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(&unit);
        current_chars += unit_chars;
    }

    if current_chars > 0 {
        chunks.push(Chunk {
            index: chunks.len(),
            text: current,
            char_count: current_chars,
        });
    }

    chunks
}

/// Split on `.`, `!`, `?` followed by whitespace. Terminators stay attached
/// to their sentence; inter-sentence whitespace is consumed.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            let s = current.trim().to_string();
            if !s.is_empty() {
                sentences.push(s);
            }
            current.clear();
        }
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Word-boundary split of an oversized sentence into pieces of at most
/// `ceiling` characters. Unbroken runs longer than the ceiling are cut at
/// the ceiling.
fn hard_split(sentence: &str, ceiling: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut cur_chars = 0usize;

    for word in sentence.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > ceiling {
            if cur_chars > 0 {
                parts.push(std::mem::take(&mut cur));
                cur_chars = 0;
            }
            let cs: Vec<char> = word.chars().collect();
            for piece in cs.chunks(ceiling) {
                parts.push(piece.iter().collect());
            }
            continue;
        }

        let sep = if cur_chars == 0 { 0 } else { 1 };
        if cur_chars + sep + word_chars > ceiling {
            parts.push(std::mem::take(&mut cur));
            cur_chars = 0;
        }
        if cur_chars > 0 {
            cur.push(' ');
            cur_chars += 1;
        }
        cur.push_str(word);
        cur_chars += word_chars;
    }

    if cur_chars > 0 {
        parts.push(cur);
    }
    parts
}

/// Last `overlap` characters of `text`, shrunk to a whole-word boundary.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let mut words: Vec<&str> = Vec::new();
    let mut total = 0usize;
    for w in text.split_whitespace().rev() {
        let add = w.chars().count() + if words.is_empty() { 0 } else { 1 };
        if total + add > overlap {
            break;
        }
        total += add;
        words.push(w);
    }
    words.reverse();
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_input() {
        assert!(chunk_text("", 512, 50).is_empty());
        assert!(chunk_text("   \n\t  ", 512, 50).is_empty());
    }

    #[test]
    fn short_input_is_one_chunk() {
        let chunks = chunk_text("One sentence. Another one.", 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "One sentence. Another one.");
        assert_eq!(chunks[0].char_count, chunks[0].text.chars().count());
    }

    #[test]
    fn indices_are_contiguous_and_bounded() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} has a bit of body to it.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 300, 40);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.char_count <= MAX_CHUNK_CHARS);
            assert_eq!(c.char_count, c.text.chars().count());
        }
    }

    #[test]
    fn overlap_seeds_are_suffixes_of_previous_chunk() {
        let text = (0..50)
            .map(|i| format!("Topic {} gets its own short sentence here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let overlap = 40;
        let chunks = chunk_text(&text, 200, overlap);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let seed = overlap_tail(&pair[0].text, overlap);
            if !seed.is_empty() {
                assert!(
                    pair[1].text.starts_with(&seed),
                    "chunk {} does not start with the seed {:?}",
                    pair[1].index,
                    seed
                );
            }
        }
    }

    #[test]
    fn removing_overlaps_reproduces_sentence_stream() {
        let text = (0..60)
            .map(|i| format!("Fact {} is recorded in the archive for posterity.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let overlap = 35;
        let chunks = chunk_text(&text, 250, overlap);

        let mut rebuilt = chunks[0].text.clone();
        for pair in chunks.windows(2) {
            let seed = overlap_tail(&pair[0].text, overlap);
            let body = if seed.is_empty() {
                pair[1].text.as_str()
            } else {
                pair[1].text[seed.len()..].trim_start()
            };
            rebuilt.push(' ');
            rebuilt.push_str(body);
        }

        let expected = split_sentences(&text).join(" ");
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        // One sentence, no terminators, longer than the hard ceiling.
        let word = "supercalifragilistic";
        let text = std::iter::repeat(word)
            .take(300)
            .collect::<Vec<_>>()
            .join(" ");
        assert!(text.chars().count() > MAX_CHUNK_CHARS);

        let chunks = chunk_text(&text, 4000, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.char_count <= MAX_CHUNK_CHARS);
        }
        // Nothing lost: all words survive in order.
        let rebuilt: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.text.split_whitespace())
            .collect();
        assert_eq!(rebuilt.len(), 300);
        assert!(rebuilt.iter().all(|w| *w == word));
    }

    #[test]
    fn unbroken_run_longer_than_ceiling_is_cut() {
        let blob = "x".repeat(MAX_CHUNK_CHARS * 2 + 17);
        let chunks = chunk_text(&blob, 512, 50);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.char_count <= MAX_CHUNK_CHARS);
        }
        let total: usize = chunks.iter().map(|c| c.char_count).sum();
        assert_eq!(total, MAX_CHUNK_CHARS * 2 + 17);
    }

    #[test]
    fn target_above_ceiling_is_clamped() {
        let text = (0..300)
            .map(|i| format!("Sentence {} fills space in the buffer.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 1_000_000, 0);
        for c in &chunks {
            assert!(c.char_count <= MAX_CHUNK_CHARS);
        }
    }
}
