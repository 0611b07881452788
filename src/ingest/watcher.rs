use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde_json::json;
use tokio::sync::watch;

use crate::core::config::load_runtime_config;
use crate::core::AppState;
use crate::ingest::chunker::chunk_text;
use crate::ingest::coordinator::{
    self, ChunkInput, ConceptMention, IngestError, NewDocument, SenderInfo,
};
use crate::ingest::detector::{self, SourceType};
use crate::ingest::parsers::{mail::MailArchive, markdown, pdf, ParseError};

// ---------------------------------------------------------------------------
// Drop-zone watcher. Creation/modification events for watched extensions go
// through the pause gate, a bounded-concurrency semaphore, fingerprinting
// and the ingest coordinator. Duplicate fingerprints read as success -
// intake is idempotent, so the resume sweep can simply rescan everything.
// ---------------------------------------------------------------------------

pub const WATCHED_EXTENSIONS: &[&str] = &["mbox", "mbx", "eml", "pdf", "md", "markdown"];

/// Kill switch: while this file exists at the watch root, events are
/// consumed but nothing is dispatched.
pub const PAUSE_SENTINEL: &str = ".pause";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Ingested(usize),
    Duplicate,
    DeadLettered,
}

pub async fn run_watcher(state: Arc<AppState>, mut stop: watch::Receiver<bool>) {
    let drop_zone = state.drop_zone.clone();
    if let Err(e) = std::fs::create_dir_all(&drop_zone) {
        tracing::error!("cannot create drop zone {}: {}", drop_zone.display(), e);
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(256);
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let _ = tx.blocking_send(event);
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("watcher init failed: {}", e);
            return;
        }
    };
    if let Err(e) = watcher.watch(&drop_zone, RecursiveMode::NonRecursive) {
        tracing::error!("cannot watch {}: {}", drop_zone.display(), e);
        return;
    }
    tracing::info!("watcher started on {}", drop_zone.display());

    // Catch anything dropped while the process was down.
    if !is_paused(&drop_zone) {
        sweep(&state).await;
    }

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                handle_event(&state, &drop_zone, event).await;
            }
        }
    }
    tracing::info!("watcher stopped");
}

async fn handle_event(state: &Arc<AppState>, drop_zone: &Path, event: Event) {
    // Pause release: the sentinel disappearing triggers a full rescan so
    // files copied in during the pause get ingested.
    if event.paths.iter().any(|p| is_sentinel(p)) {
        if !is_paused(drop_zone) {
            tracing::info!("pause sentinel removed — sweeping drop zone");
            sweep(state).await;
        } else {
            tracing::info!("pause sentinel present — intake paused");
        }
        return;
    }

    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    for path in event.paths {
        if !is_watched(&path) {
            continue;
        }
        if is_paused(drop_zone) {
            tracing::debug!("paused — dropping event for {}", path.display());
            continue;
        }
        dispatch(state, path).await;
    }
}

/// Process every watched file currently in the drop zone. Dedup makes this
/// safe to run at any time.
async fn sweep(state: &Arc<AppState>) {
    let entries = match std::fs::read_dir(&state.drop_zone) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("drop zone sweep failed: {}", e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && is_watched(&path) {
            dispatch(state, path).await;
        }
    }
}

async fn dispatch(state: &Arc<AppState>, path: PathBuf) {
    let state = Arc::clone(state);
    let permit = match Arc::clone(&state.ingest_limit).acquire_owned().await {
        Ok(p) => p,
        Err(_) => return, // semaphore closed, shutting down
    };
    tokio::spawn(async move {
        let _permit = permit;
        match process_file(&state, &path).await {
            Ok(outcome) => {
                tracing::debug!("processed {}: {:?}", path.display(), outcome)
            }
            Err(e) => tracing::error!("file handling error for {}: {}", path.display(), e),
        }
    });
}

fn is_watched(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| WATCHED_EXTENSIONS.contains(&e.as_str()))
}

fn is_sentinel(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(PAUSE_SENTINEL)
}

fn is_paused(drop_zone: &Path) -> bool {
    drop_zone.join(PAUSE_SENTINEL).exists()
}

/// Fingerprint, parse, chunk, scan and hand off one file. Also the entry
/// point for dead-letter retries.
pub async fn process_file(state: &Arc<AppState>, path: &Path) -> anyhow::Result<ProcessOutcome> {
    let source_type = {
        let p = path.to_path_buf();
        tokio::task::spawn_blocking(move || detector::detect_type(&p)).await?
    };
    if source_type == SourceType::Unknown {
        coordinator::write_dead_letter(
            &state.pool,
            &path.to_string_lossy(),
            "unknown or unsupported file type",
        )
        .await;
        return Ok(ProcessOutcome::DeadLettered);
    }

    let cfg = load_runtime_config(&state.pool).await;

    // Parsing, chunking and PII tagging are CPU-bound - off the scheduler.
    let docs = {
        let path = path.to_path_buf();
        let pii = Arc::clone(&state.pii);
        let ner = Arc::clone(&state.ner);
        tokio::task::spawn_blocking(move || {
            build_documents(&path, source_type, cfg.chunk_size, cfg.chunk_overlap, &pii, &ner)
        })
        .await?
    };

    let docs = match docs {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("parse failed for {}: {}", path.display(), e);
            coordinator::write_dead_letter(&state.pool, &path.to_string_lossy(), &e.to_string())
                .await;
            return Ok(ProcessOutcome::DeadLettered);
        }
    };

    let mut ingested = 0usize;
    let mut duplicates = 0usize;
    for doc in docs {
        match coordinator::ingest_document(&state.pool, doc).await {
            Ok(_) => ingested += 1,
            Err(IngestError::Duplicate) => {
                duplicates += 1;
                tracing::info!("duplicate fingerprint for {} — skipping", path.display());
            }
            Err(IngestError::Db(e)) => {
                coordinator::write_dead_letter(&state.pool, &path.to_string_lossy(), &e.to_string())
                    .await;
                return Err(e.into());
            }
        }
    }

    if ingested == 0 && duplicates > 0 {
        Ok(ProcessOutcome::Duplicate)
    } else {
        Ok(ProcessOutcome::Ingested(ingested))
    }
}

fn build_documents(
    path: &Path,
    source_type: SourceType,
    chunk_size: usize,
    chunk_overlap: usize,
    pii: &crate::ingest::pii::PiiScanner,
    ner: &crate::ingest::ner::NerCapability,
) -> Result<Vec<NewDocument>, ParseError> {
    let source_path = path.to_string_lossy().to_string();

    match source_type {
        SourceType::Mail => {
            let archive = MailArchive::read(path)?;
            let mut docs = Vec::new();
            let mut first_error: Option<ParseError> = None;
            for item in archive.messages() {
                match item {
                    Ok(message) => {
                        let (chunks, concepts) =
                            chunk_and_scan(&message.body_text, chunk_size, chunk_overlap, pii, ner);
                        let mut metadata = serde_json::Map::new();
                        metadata.insert("subject".into(), json!(message.subject));
                        metadata.insert("message_id".into(), json!(message.message_id));
                        metadata.insert("date".into(), json!(message.date.to_rfc3339()));
                        docs.push(NewDocument {
                            source_path: source_path.clone(),
                            source_type,
                            sha256: message.sha256.clone(),
                            sender: SenderInfo {
                                email: message.sender_email.clone(),
                                name: message.sender_name.clone(),
                            },
                            recipients: message.recipients.clone(),
                            metadata,
                            chunks,
                            concepts,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("skipping malformed message in {}: {}", source_path, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if docs.is_empty() {
                return Err(first_error
                    .unwrap_or_else(|| ParseError::Mail("archive contains no messages".into())));
            }
            Ok(docs)
        }
        SourceType::Pdf | SourceType::Markdown => {
            let text = match source_type {
                SourceType::Pdf => pdf::parse_pdf(path)?,
                _ => markdown::parse_markdown(path)?,
            };
            let sha256 = detector::sha256_file(path)?;
            let (chunks, concepts) = chunk_and_scan(&text, chunk_size, chunk_overlap, pii, ner);
            Ok(vec![NewDocument {
                source_path,
                source_type,
                sha256,
                sender: SenderInfo::unknown(),
                recipients: Vec::new(),
                metadata: serde_json::Map::new(),
                chunks,
                concepts,
            }])
        }
        SourceType::Unknown => Err(ParseError::UnknownType),
    }
}

fn chunk_and_scan(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    pii: &crate::ingest::pii::PiiScanner,
    ner: &crate::ingest::ner::NerCapability,
) -> (Vec<ChunkInput>, Vec<ConceptMention>) {
    let mut chunks = Vec::new();
    let mut concepts = Vec::new();
    for chunk in chunk_text(text, chunk_size, chunk_overlap) {
        let index = chunk.index as i32;
        chunks.push(ChunkInput {
            index,
            text: chunk.text.clone(),
            char_count: chunk.char_count as i32,
            pii_detected: pii.has_pii(&chunk.text, ner),
        });
        for entity in ner.extract(&chunk.text) {
            concepts.push(ConceptMention {
                chunk_index: index,
                entity,
            });
        }
    }
    (chunks, concepts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watched_extension_filter() {
        assert!(is_watched(Path::new("/z/inbox.mbox")));
        assert!(is_watched(Path::new("/z/REPORT.PDF")));
        assert!(is_watched(Path::new("/z/notes.md")));
        assert!(!is_watched(Path::new("/z/archive.zip")));
        assert!(!is_watched(Path::new("/z/noext")));
        assert!(!is_watched(Path::new("/z/.pause")));
    }

    #[test]
    fn pause_sentinel_gates_intake() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_paused(dir.path()));
        std::fs::write(dir.path().join(PAUSE_SENTINEL), b"").unwrap();
        assert!(is_paused(dir.path()));
        std::fs::remove_file(dir.path().join(PAUSE_SENTINEL)).unwrap();
        assert!(!is_paused(dir.path()));
    }

    #[test]
    fn sentinel_path_detection() {
        assert!(is_sentinel(Path::new("/drop/.pause")));
        assert!(!is_sentinel(Path::new("/drop/pause")));
        assert!(!is_sentinel(Path::new("/drop/notes.md")));
    }

    #[test]
    fn mail_archive_becomes_one_document_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.mbox");
        std::fs::write(
            &path,
            "From a@x.com Thu Jan  1 10:00:00 2026\nFrom: a@x.com\nTo: b@x.com\nSubject: one\n\nFirst body here.\n\nFrom b@x.com Thu Jan  1 11:00:00 2026\nFrom: b@x.com\nTo: a@x.com\nSubject: two\n\nSecond body here.\n",
        )
        .unwrap();

        let pii = crate::ingest::pii::PiiScanner::new();
        let ner = crate::ingest::ner::NerCapability::Unavailable;
        let docs = build_documents(&path, SourceType::Mail, 512, 50, &pii, &ner).unwrap();
        assert_eq!(docs.len(), 2);
        assert_ne!(docs[0].sha256, docs[1].sha256);
        assert_eq!(docs[0].sender.email, "a@x.com");
        assert!(!docs[0].chunks.is_empty());
        assert_eq!(docs[0].chunks[0].index, 0);
    }

    #[test]
    fn markdown_file_becomes_single_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "---\ntitle: x\n---\n# Head\n\nSome body. More text.\n").unwrap();

        let pii = crate::ingest::pii::PiiScanner::new();
        let ner = crate::ingest::ner::NerCapability::Unavailable;
        let docs = build_documents(&path, SourceType::Markdown, 512, 50, &pii, &ner).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].sender.email, "unknown@unknown");
        assert!(docs[0].chunks[0].text.contains("Some body."));
        assert!(!docs[0].chunks[0].text.contains("title"));
    }
}
