use std::path::Path;

use pulldown_cmark::{Event, Parser, TagEnd};

use super::ParseError;

// ---------------------------------------------------------------------------
// Markdown → plain text. YAML frontmatter and markup are stripped; link
// text survives, inline/fenced code does not.
// ---------------------------------------------------------------------------

pub fn parse_markdown(path: &Path) -> Result<String, ParseError> {
    let raw = std::fs::read(path)?;
    let raw = String::from_utf8_lossy(&raw);
    Ok(markdown_to_text(&raw))
}

pub fn markdown_to_text(raw: &str) -> String {
    let body = strip_frontmatter(raw);

    let mut out = String::new();
    let mut in_code_block = false;
    for event in Parser::new(body) {
        match event {
            Event::Start(pulldown_cmark::Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(t) => {
                if !in_code_block {
                    out.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item) => out.push('\n'),
            _ => {}
        }
    }

    out.trim().to_string()
}

fn strip_frontmatter(raw: &str) -> &str {
    if let Some(rest) = raw.strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            let after = &rest[end + 4..];
            return after.strip_prefix('\n').unwrap_or(after);
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_is_stripped() {
        let raw = "---\ntitle: Notes\ntags: [a, b]\n---\n# Heading\n\nBody text here.\n";
        let text = markdown_to_text(raw);
        assert!(!text.contains("title"));
        assert!(text.contains("Heading"));
        assert!(text.contains("Body text here."));
    }

    #[test]
    fn markup_is_stripped_link_text_survives() {
        let raw = "Some **bold** and *italic* and a [link label](https://example.com).";
        let text = markdown_to_text(raw);
        assert_eq!(text, "Some bold and italic and a link label.");
    }

    #[test]
    fn code_is_dropped() {
        let raw = "Before.\n\n```rust\nfn hidden() {}\n```\n\nAfter.";
        let text = markdown_to_text(raw);
        assert!(text.contains("Before."));
        assert!(text.contains("After."));
        assert!(!text.contains("hidden"));
    }

    #[test]
    fn no_frontmatter_passes_through() {
        assert_eq!(markdown_to_text("plain line"), "plain line");
    }
}
