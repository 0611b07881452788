use std::path::Path;

use chrono::{DateTime, Utc};
use mail_parser::{Addr, Address, Message, MessageParser};
use uuid::Uuid;

use super::{MailRecipient, ParseError, ParsedMessage, RecipientField};
use crate::ingest::detector;

// ---------------------------------------------------------------------------
// Mail archive parser. An archive is either an mbox (From_-separated) or a
// single RFC 822 message (.eml). Messages are surfaced lazily, one at a
// time; a message that fails to parse yields an error item and the iterator
// keeps going.
// ---------------------------------------------------------------------------

pub struct MailArchive {
    data: Vec<u8>,
}

impl MailArchive {
    pub fn read(path: &Path) -> Result<Self, ParseError> {
        Ok(Self {
            data: std::fs::read(path)?,
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Lazy sequence of parsed messages over the archive.
    pub fn messages(&self) -> MessageIter<'_> {
        MessageIter {
            data: &self.data,
            pos: 0,
            done: false,
            is_mbox: self.data.starts_with(b"From "),
        }
    }
}

pub struct MessageIter<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
    is_mbox: bool,
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<ParsedMessage, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.is_mbox {
            // Single .eml message.
            self.done = true;
            return Some(parse_message_bytes(self.data));
        }

        while self.pos < self.data.len() {
            let start = self.pos;
            let end = next_envelope(self.data, start + 1);
            self.pos = end;

            // Drop the "From ..." envelope line before RFC 822 parsing.
            let block = &self.data[start..end];
            let body_start = block
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| i + 1)
                .unwrap_or(block.len());
            let raw = &block[body_start..];
            if raw.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Some(parse_message_bytes(raw));
        }

        self.done = true;
        None
    }
}

/// Offset of the next "\nFrom " separator at or after `from`, or the end of
/// the archive.
fn next_envelope(data: &[u8], from: usize) -> usize {
    let needle = b"\nFrom ";
    let mut i = from;
    while i + needle.len() <= data.len() {
        if &data[i..i + needle.len()] == needle {
            return i + 1; // start of the "From " line
        }
        i += 1;
    }
    data.len()
}

fn parse_message_bytes(raw: &[u8]) -> Result<ParsedMessage, ParseError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| ParseError::Mail("unparseable message".to_string()))?;

    let (sender_email, sender_name) = message
        .from()
        .and_then(first_addr)
        .unwrap_or_else(|| ("unknown@unknown".to_string(), String::new()));

    let mut recipients = Vec::new();
    for (field, addr) in [
        (RecipientField::To, message.to()),
        (RecipientField::Cc, message.cc()),
        (RecipientField::Bcc, message.bcc()),
    ] {
        if let Some(addr) = addr {
            for (email, name) in flatten_address(addr) {
                recipients.push(MailRecipient { email, name, field });
            }
        }
    }

    let subject = message.subject().unwrap_or_default().trim().to_string();
    let body_text = extract_body(&message);
    let date = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);
    let message_id = message
        .message_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(ParsedMessage {
        message_id,
        sender_email,
        sender_name,
        recipients,
        subject,
        body_text,
        date,
        sha256: detector::sha256_bytes(raw),
    })
}

/// Prefer text/plain; fall back to the HTML part with markup stripped.
fn extract_body(message: &Message) -> String {
    if let Some(text) = message.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = message.body_html(0) {
        return strip_html(&html);
    }
    String::new()
}

fn strip_html(html: &str) -> String {
    let no_tags = regex::Regex::new(r"(?s)<[^>]*>")
        .unwrap()
        .replace_all(html, " ");
    let collapsed = regex::Regex::new(r"\s+").unwrap().replace_all(&no_tags, " ");
    collapsed
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .trim()
        .to_string()
}

fn first_addr(addr: &Address) -> Option<(String, String)> {
    flatten_address(addr).into_iter().next()
}

fn flatten_address(addr: &Address) -> Vec<(String, String)> {
    let mut out = Vec::new();
    match addr {
        Address::List(list) => {
            for a in list {
                push_addr(&mut out, a);
            }
        }
        Address::Group(groups) => {
            for g in groups {
                for a in &g.addresses {
                    push_addr(&mut out, a);
                }
            }
        }
    }
    out
}

fn push_addr(out: &mut Vec<(String, String)>, a: &Addr) {
    let Some(email) = &a.address else {
        return;
    };
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return;
    }
    let name = a.name.as_deref().unwrap_or("").trim().to_string();
    out.push((email, name));
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MBOX: &str = "\
From alice@example.com Thu Jan  1 10:00:00 2026
From: Alice Archer <Alice@Example.com>
To: Bob Builder <bob@example.com>, carol@example.com
Cc: dave@example.com
Subject: Quarterly budget
Message-ID: <m1@example.com>
Date: Thu, 01 Jan 2026 10:00:00 +0000
Content-Type: text/plain

The quarterly budget is attached. Numbers look fine.

From bob@example.com Thu Jan  1 11:00:00 2026
From: bob@example.com
To: alice@example.com
Subject: Re: Quarterly budget
Message-ID: <m2@example.com>
Date: Thu, 01 Jan 2026 11:00:00 +0000
Content-Type: text/plain

Thanks, reviewing now.
";

    #[test]
    fn mbox_yields_one_message_per_entry() {
        let archive = MailArchive::from_bytes(SAMPLE_MBOX.as_bytes().to_vec());
        let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
        assert_eq!(messages.len(), 2);

        let first = &messages[0];
        assert_eq!(first.sender_email, "alice@example.com");
        assert_eq!(first.sender_name, "Alice Archer");
        assert_eq!(first.subject, "Quarterly budget");
        assert_eq!(first.message_id, "m1@example.com");
        assert!(first.body_text.contains("quarterly budget is attached"));

        // Recipients across to/cc, addresses case-folded.
        assert_eq!(first.recipients.len(), 3);
        assert!(first
            .recipients
            .iter()
            .any(|r| r.email == "bob@example.com" && r.field == RecipientField::To));
        assert!(first
            .recipients
            .iter()
            .any(|r| r.email == "dave@example.com" && r.field == RecipientField::Cc));
    }

    #[test]
    fn messages_get_distinct_fingerprints() {
        let archive = MailArchive::from_bytes(SAMPLE_MBOX.as_bytes().to_vec());
        let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
        assert_ne!(messages[0].sha256, messages[1].sha256);
    }

    #[test]
    fn single_eml_is_one_message() {
        let eml = "From: eve@example.com\r\nTo: alice@example.com\r\nSubject: hi\r\n\r\nhello\r\n";
        let archive = MailArchive::from_bytes(eml.as_bytes().to_vec());
        let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_email, "eve@example.com");
        assert_eq!(messages[0].body_text, "hello");
    }

    #[test]
    fn html_only_body_is_stripped() {
        let eml = "From: eve@example.com\r\nSubject: hi\r\nContent-Type: text/html\r\n\r\n<html><body><p>Hello <b>world</b></p></body></html>\r\n";
        let archive = MailArchive::from_bytes(eml.as_bytes().to_vec());
        let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
        let body = &messages[0].body_text;
        assert!(body.contains("Hello"));
        assert!(body.contains("world"));
        assert!(!body.contains('<'));
    }

    #[test]
    fn missing_sender_falls_back_to_unknown() {
        let eml = "Subject: orphan\r\n\r\nno headers to speak of\r\n";
        let archive = MailArchive::from_bytes(eml.as_bytes().to_vec());
        let messages: Vec<_> = archive.messages().collect::<Result<_, _>>().unwrap();
        assert_eq!(messages[0].sender_email, "unknown@unknown");
    }
}
