use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Content fingerprint + source-type tag. Extension wins; magic bytes are the
// fallback for missing or ambiguous extensions. Unknown dead-letters.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Mail,
    Pdf,
    Markdown,
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Mail => "mail",
            SourceType::Pdf => "pdf",
            SourceType::Markdown => "markdown",
            SourceType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const EXT_MAP: &[(&str, SourceType)] = &[
    ("mbox", SourceType::Mail),
    ("mbx", SourceType::Mail),
    ("eml", SourceType::Mail),
    ("pdf", SourceType::Pdf),
    ("md", SourceType::Markdown),
    ("markdown", SourceType::Markdown),
];

/// Streaming SHA-256 over the file in 64 KiB blocks. Blocking - callers on
/// the async runtime go through `spawn_blocking`.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher))
}

/// SHA-256 of an in-memory slice (per-message fingerprints in mail archives).
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Extension-first type detection with a magic-byte fallback.
pub fn detect_type(path: &Path) -> SourceType {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if let Some((_, t)) = EXT_MAP.iter().find(|(e, _)| *e == ext) {
            return *t;
        }
    }

    match std::fs::read(path) {
        Ok(data) => detect_from_bytes(&data),
        Err(_) => SourceType::Unknown,
    }
}

fn detect_from_bytes(data: &[u8]) -> SourceType {
    if let Some(kind) = infer::get(data) {
        if kind.mime_type() == "application/pdf" {
            return SourceType::Pdf;
        }
    }
    // mbox archives open with an mbox From_ separator line.
    if data.starts_with(b"From ") {
        return SourceType::Mail;
    }
    // Plain UTF-8 text is treated as markdown; binary content dead-letters.
    if std::str::from_utf8(data).is_ok() {
        return SourceType::Markdown;
    }
    SourceType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn extension_wins() {
        assert_eq!(detect_type(Path::new("a/b/inbox.mbox")), SourceType::Mail);
        assert_eq!(detect_type(Path::new("report.PDF")), SourceType::Pdf);
        assert_eq!(detect_type(Path::new("notes.markdown")), SourceType::Markdown);
        assert_eq!(detect_type(Path::new("message.eml")), SourceType::Mail);
    }

    #[test]
    fn magic_fallback_on_missing_extension() {
        let dir = tempfile::tempdir().unwrap();

        let pdf = dir.path().join("noext_pdf");
        std::fs::File::create(&pdf)
            .unwrap()
            .write_all(b"%PDF-1.7 rest of file")
            .unwrap();
        assert_eq!(detect_type(&pdf), SourceType::Pdf);

        let mbox = dir.path().join("noext_mbox");
        std::fs::File::create(&mbox)
            .unwrap()
            .write_all(b"From alice@example.com Thu Jan  1 00:00:00 2026\n")
            .unwrap();
        assert_eq!(detect_type(&mbox), SourceType::Mail);

        let text = dir.path().join("noext_text");
        std::fs::File::create(&text)
            .unwrap()
            .write_all(b"just some plain notes\n")
            .unwrap();
        assert_eq!(detect_type(&text), SourceType::Markdown);

        let binary = dir.path().join("noext_binary");
        std::fs::File::create(&binary)
            .unwrap()
            .write_all(&[0u8, 159, 146, 150, 255, 0, 1])
            .unwrap();
        assert_eq!(detect_type(&binary), SourceType::Unknown);
    }

    #[test]
    fn fingerprint_is_stable_and_streamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        // Larger than one 64 KiB block to exercise the streaming path.
        let data = vec![42u8; 200_000];
        std::fs::write(&path, &data).unwrap();

        let streamed = sha256_file(&path).unwrap();
        let in_memory = sha256_bytes(&data);
        assert_eq!(streamed, in_memory);
        assert_eq!(streamed.len(), 64);
    }
}
