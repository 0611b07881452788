pub mod mail;
pub mod markdown;
pub mod pdf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Normalized parser output. Malformed inputs become ParseError values that
// the intake turns into dead-letter rows - parsers never kill the pipeline.
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("mail parse error: {0}")]
    Mail(String),
    #[error("pdf parse error: {0}")]
    Pdf(String),
    #[error("unsupported or unknown file type")]
    UnknownType,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientField {
    To,
    Cc,
    Bcc,
}

impl RecipientField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientField::To => "to",
            RecipientField::Cc => "cc",
            RecipientField::Bcc => "bcc",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailRecipient {
    pub email: String,
    pub name: String,
    pub field: RecipientField,
}

/// One logical message out of a mail archive, headers decoded and addresses
/// folded to lowercase.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub recipients: Vec<MailRecipient>,
    pub subject: String,
    pub body_text: String,
    pub date: DateTime<Utc>,
    /// Fingerprint of the raw message bytes - the per-document dedup key
    /// for archive entries.
    pub sha256: String,
}
