use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::ingest::detector::SourceType;
use crate::ingest::ner::Entity;
use crate::ingest::parsers::MailRecipient;

// ---------------------------------------------------------------------------
// Ingest coordinator. One document, its persons, its chunks and its outbox
// event commit together or not at all - the graph store converges later via
// the drainer, never from this path.
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("duplicate content fingerprint")]
    Duplicate,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct SenderInfo {
    pub email: String,
    pub name: String,
}

impl SenderInfo {
    /// Placeholder sender for sourceless documents (PDF, Markdown).
    pub fn unknown() -> Self {
        Self {
            email: "unknown@unknown".to_string(),
            name: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub index: i32,
    pub text: String,
    pub char_count: i32,
    pub pii_detected: bool,
}

/// Entity mention to surface as a `concept_added` graph event, keyed by the
/// chunk it was found in.
#[derive(Debug, Clone)]
pub struct ConceptMention {
    pub chunk_index: i32,
    pub entity: Entity,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub source_path: String,
    pub source_type: SourceType,
    pub sha256: String,
    pub sender: SenderInfo,
    pub recipients: Vec<MailRecipient>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub chunks: Vec<ChunkInput>,
    pub concepts: Vec<ConceptMention>,
}

pub async fn sha256_exists(pool: &PgPool, sha256: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM documents WHERE sha256 = $1")
        .bind(sha256)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Persist a parsed document. Fails with `Duplicate` when the fingerprint is
/// already known - including the race where two identical files arrive
/// inside the pre-check window and the unique index breaks the tie.
pub async fn ingest_document(pool: &PgPool, doc: NewDocument) -> Result<Uuid, IngestError> {
    if sha256_exists(pool, &doc.sha256).await? {
        return Err(IngestError::Duplicate);
    }

    let doc_id = Uuid::new_v4();
    let now = Utc::now();

    let mut metadata = doc.metadata.clone();
    metadata.insert("sender_email".to_string(), json!(doc.sender.email));

    let mut tx = pool.begin().await?;

    // 1. Document row. A concurrent identical ingest loses on the unique
    //    fingerprint index and reads as Duplicate.
    let inserted = sqlx::query(
        "INSERT INTO documents (id, source_path, source_type, sha256, ingested_at, metadata)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(doc_id)
    .bind(&doc.source_path)
    .bind(doc.source_type.as_str())
    .bind(&doc.sha256)
    .bind(now)
    .bind(serde_json::Value::Object(metadata))
    .execute(&mut *tx)
    .await;
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(IngestError::Duplicate);
        }
        return Err(e.into());
    }

    // 2. Sender upsert - display name follows the latest sighting.
    let display_name = if doc.sender.name.is_empty() {
        doc.sender.email.clone()
    } else {
        doc.sender.name.clone()
    };
    sqlx::query(
        "INSERT INTO persons (id, email, display_name, pii)
         VALUES ($1, $2, $3, true)
         ON CONFLICT (email) DO UPDATE SET display_name = EXCLUDED.display_name, updated_at = now()",
    )
    .bind(Uuid::new_v4())
    .bind(&doc.sender.email)
    .bind(&display_name)
    .execute(&mut *tx)
    .await?;
    let (sender_id,): (Uuid,) = sqlx::query_as("SELECT id FROM persons WHERE email = $1")
        .bind(&doc.sender.email)
        .fetch_one(&mut *tx)
        .await?;

    // 3. Recipients - create only, never overwrite.
    for r in &doc.recipients {
        let name = if r.name.is_empty() { &r.email } else { &r.name };
        sqlx::query(
            "INSERT INTO persons (id, email, display_name, pii)
             VALUES ($1, $2, $3, true)
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&r.email)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    }

    // 4. Chunks, all pending. Duplicate indices in the input are dropped so
    //    a re-run of the same parse is idempotent.
    let mut chunk_ids = std::collections::HashMap::new();
    let mut seen_indices = std::collections::HashSet::new();
    for chunk in &doc.chunks {
        if !seen_indices.insert(chunk.index) {
            continue;
        }
        let chunk_id = Uuid::new_v4();
        chunk_ids.insert(chunk.index, chunk_id);
        sqlx::query(
            "INSERT INTO chunks (id, doc_id, chunk_index, text, char_count, embedding_status, retry_count, pii_detected)
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6)
             ON CONFLICT (doc_id, chunk_index) DO NOTHING",
        )
        .bind(chunk_id)
        .bind(doc_id)
        .bind(chunk.index)
        .bind(&chunk.text)
        .bind(chunk.char_count)
        .bind(chunk.pii_detected)
        .execute(&mut *tx)
        .await?;
    }

    // 5. Exactly one document_added event rides the same transaction.
    let payload = document_added_payload(doc_id, &doc, sender_id, now);
    sqlx::query("INSERT INTO outbox (event_type, payload, created_at) VALUES ('document_added', $1, $2)")
        .bind(&payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    // Concept mentions from the tagger, when it was available at parse time.
    for mention in &doc.concepts {
        let Some(chunk_id) = chunk_ids.get(&mention.chunk_index) else {
            continue;
        };
        let concept = concept_added_payload(doc_id, *chunk_id, &mention.entity, now);
        sqlx::query("INSERT INTO outbox (event_type, payload, created_at) VALUES ('concept_added', $1, $2)")
            .bind(&concept)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    tracing::info!(
        "document ingested: id={} path={} chunks={}",
        doc_id,
        doc.source_path,
        seen_indices.len()
    );
    Ok(doc_id)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.constraint().is_some_and(|c| c.contains("sha256")))
}

fn document_added_payload(
    doc_id: Uuid,
    doc: &NewDocument,
    sender_id: Uuid,
    now: DateTime<Utc>,
) -> serde_json::Value {
    json!({
        "doc_id": doc_id,
        "source_path": doc.source_path,
        "source_type": doc.source_type.as_str(),
        "ingested_at": now.to_rfc3339(),
        "sender": { "id": sender_id, "email": doc.sender.email, "name": doc.sender.name },
        "recipients": doc.recipients,
    })
}

fn concept_added_payload(
    doc_id: Uuid,
    chunk_id: Uuid,
    entity: &Entity,
    now: DateTime<Utc>,
) -> serde_json::Value {
    json!({
        "doc_id": doc_id,
        "chunk_id": chunk_id,
        "entity_text": entity.text,
        "entity_label": entity.label.as_str(),
        "valid_at": now.to_rfc3339(),
    })
}

/// Parse failures land here instead of aborting the watcher.
pub async fn write_dead_letter(pool: &PgPool, file_path: &str, error: &str) {
    let result = sqlx::query(
        "INSERT INTO dead_letter (file_path, error) VALUES ($1, $2)
         ON CONFLICT (file_path) DO UPDATE SET error = EXCLUDED.error, last_attempt = now()",
    )
    .bind(file_path)
    .bind(error)
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::error!("dead-letter write failed for {}: {}", file_path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ner::EntityLabel;
    use crate::ingest::parsers::RecipientField;

    #[test]
    fn document_added_payload_carries_envelope() {
        let doc = NewDocument {
            source_path: "/drop-zone/inbox.mbox".to_string(),
            source_type: SourceType::Mail,
            sha256: "ab".repeat(32),
            sender: SenderInfo {
                email: "alice@example.com".to_string(),
                name: "Alice".to_string(),
            },
            recipients: vec![MailRecipient {
                email: "bob@example.com".to_string(),
                name: "Bob".to_string(),
                field: RecipientField::To,
            }],
            metadata: serde_json::Map::new(),
            chunks: vec![],
            concepts: vec![],
        };
        let doc_id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();
        let payload = document_added_payload(doc_id, &doc, sender_id, Utc::now());

        assert_eq!(payload["doc_id"], json!(doc_id));
        assert_eq!(payload["source_type"], json!("mail"));
        assert_eq!(payload["sender"]["email"], json!("alice@example.com"));
        assert_eq!(payload["recipients"][0]["field"], json!("to"));
        assert!(payload["ingested_at"].as_str().is_some());
    }

    #[test]
    fn concept_payload_carries_label() {
        let entity = Entity {
            text: "Acme Widgets Inc".to_string(),
            label: EntityLabel::Org,
        };
        let payload = concept_added_payload(Uuid::new_v4(), Uuid::new_v4(), &entity, Utc::now());
        assert_eq!(payload["entity_label"], json!("ORG"));
        assert_eq!(payload["entity_text"], json!("Acme Widgets Inc"));
    }
}
