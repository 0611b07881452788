//! Offline slice of the intake path: type detection, archive parsing,
//! chunking and PII tagging - everything up to the store boundary.

use std::io::Write;

use packrat::chunker::chunk_text;
use packrat::ingest::detector::{detect_type, sha256_file, SourceType};
use packrat::ingest::ner::{NerCapability, RuleTagger};
use packrat::ingest::parsers::mail::MailArchive;
use packrat::ingest::parsers::markdown::markdown_to_text;
use packrat::pii::PiiScanner;

const THREE_MESSAGE_MBOX: &str = "\
From alice@example.com Thu Jan  1 10:00:00 2026
From: Alice Archer <alice@example.com>
To: Bob Builder <bob@example.com>
Subject: Quarterly budget
Date: Thu, 01 Jan 2026 10:00:00 +0000

The quarterly budget is ready for review. Totals are up four percent.

From bob@example.com Thu Jan  1 11:00:00 2026
From: Bob Builder <bob@example.com>
To: alice@example.com
Cc: carol@example.com
Subject: Re: Quarterly budget
Date: Thu, 01 Jan 2026 11:00:00 +0000

Looks good. One question about the travel line item.

From carol@example.com Thu Jan  1 12:00:00 2026
From: carol@example.com
To: alice@example.com, bob@example.com
Subject: Re: Re: Quarterly budget
Date: Thu, 01 Jan 2026 12:00:00 +0000

Signing off on this. My card 4111 1111 1111 1111 got charged twice though.
";

#[test]
fn archive_with_three_messages_yields_three_documents() {
    let archive = MailArchive::from_bytes(THREE_MESSAGE_MBOX.as_bytes().to_vec());
    let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
    assert_eq!(messages.len(), 3);

    // Each message carries a sender and at least one recipient.
    for m in &messages {
        assert!(m.sender_email.contains('@'));
        assert!(!m.recipients.is_empty());
    }

    // Fingerprints are pairwise distinct - three documents, not one.
    assert_ne!(messages[0].sha256, messages[1].sha256);
    assert_ne!(messages[1].sha256, messages[2].sha256);
    assert_ne!(messages[0].sha256, messages[2].sha256);
}

#[test]
fn reparsing_the_same_archive_is_deterministic() {
    let first: Vec<_> = MailArchive::from_bytes(THREE_MESSAGE_MBOX.as_bytes().to_vec())
        .messages()
        .collect::<Result<_, _>>()
        .unwrap();
    let second: Vec<_> = MailArchive::from_bytes(THREE_MESSAGE_MBOX.as_bytes().to_vec())
        .messages()
        .collect::<Result<_, _>>()
        .unwrap();
    let shas_a: Vec<_> = first.iter().map(|m| m.sha256.clone()).collect();
    let shas_b: Vec<_> = second.iter().map(|m| m.sha256.clone()).collect();
    assert_eq!(shas_a, shas_b, "dedup depends on stable fingerprints");
}

#[test]
fn pii_card_number_is_flagged_but_clean_bodies_are_not() {
    let archive = MailArchive::from_bytes(THREE_MESSAGE_MBOX.as_bytes().to_vec());
    let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
    let scanner = PiiScanner::new();
    let ner = NerCapability::Unavailable;

    assert!(!scanner.has_pii(&messages[0].body_text, &ner));
    assert!(!scanner.has_pii(&messages[1].body_text, &ner));
    assert!(scanner.has_pii(&messages[2].body_text, &ner));
}

#[test]
fn message_bodies_chunk_into_pending_ready_inputs() {
    let archive = MailArchive::from_bytes(THREE_MESSAGE_MBOX.as_bytes().to_vec());
    for message in archive.messages() {
        let message = message.unwrap();
        let chunks = chunk_text(&message.body_text, 512, 50);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].index, 0);
    }
}

#[test]
fn tagger_extracts_people_from_message_bodies() {
    let tagger = RuleTagger::new();
    let entities = tagger.extract("Alice Archer and Bob Builder met in Berlin.");
    let names: Vec<&str> = entities.iter().map(|e| e.text.as_str()).collect();
    assert!(names.contains(&"Alice Archer"));
    assert!(names.contains(&"Bob Builder"));
}

#[test]
fn detector_distinguishes_the_three_supported_shapes() {
    let dir = tempfile::tempdir().unwrap();

    let mbox = dir.path().join("drop.mbox");
    std::fs::write(&mbox, THREE_MESSAGE_MBOX).unwrap();
    assert_eq!(detect_type(&mbox), SourceType::Mail);

    let md = dir.path().join("drop.md");
    std::fs::write(&md, "# notes\n\nbody\n").unwrap();
    assert_eq!(detect_type(&md), SourceType::Markdown);

    // Extensionless mbox still resolves through magic bytes.
    let anon = dir.path().join("anonymous");
    let mut f = std::fs::File::create(&anon).unwrap();
    f.write_all(THREE_MESSAGE_MBOX.as_bytes()).unwrap();
    assert_eq!(detect_type(&anon), SourceType::Mail);
}

#[test]
fn identical_files_share_a_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("one.md");
    let b = dir.path().join("two.md");
    std::fs::write(&a, "same content").unwrap();
    std::fs::write(&b, "same content").unwrap();
    assert_eq!(sha256_file(&a).unwrap(), sha256_file(&b).unwrap());
}

#[test]
fn markdown_frontmatter_never_reaches_the_chunker() {
    let text = markdown_to_text("---\nsecret: frontmatter\n---\n# Title\n\nReal content here.");
    let chunks = chunk_text(&text, 512, 50);
    assert_eq!(chunks.len(), 1);
    assert!(!chunks[0].text.contains("frontmatter"));
    assert!(chunks[0].text.contains("Real content here."));
}
