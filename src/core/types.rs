use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Wire types for the HTTP surface. Validation limits live next to the types
// they bound; handlers reject out-of-range values with a 4xx detail string.
// ---------------------------------------------------------------------------

pub const MAX_QUERY_CHARS: usize = 2000;
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_INGEST_TEXT_CHARS: usize = 500_000;
pub const MAX_REDACT_BATCH: i64 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub doc_id: Uuid,
    pub source_path: String,
    pub sender: String,
    pub snippet: String,
    pub lex_score: f64,
    pub vec_score: f64,
    pub rerank_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub degraded: bool,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// --- /ingest/text ---

#[derive(Debug, Deserialize)]
pub struct IngestTextRequest {
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestTextResponse {
    pub queued: bool,
    pub doc_id: Uuid,
    pub file: String,
}

// --- /entities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Document,
    Person,
}

impl EntityType {
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Document => "documents",
            EntityType::Person => "persons",
        }
    }

    pub fn parse(s: &str) -> Option<EntityType> {
        match s {
            "document" => Some(EntityType::Document),
            "person" => Some(EntityType::Person),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SoftDeleteResponse {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub deleted_at: String,
}

/// Field diffs pushed from an external editor. Only allowlisted keys are
/// applied; the conflict rule is server-timestamp-wins.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub diffs: serde_json::Map<String, serde_json::Value>,
    pub client_updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub updated_fields: Vec<String>,
    pub conflict_detected: bool,
    pub server_updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct HardDeleteResponse {
    pub deleted_documents: u64,
    pub deleted_persons: u64,
    pub deleted_chunks: u64,
    pub log_path: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub name_a: String,
    pub name_b: String,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub merged_from: Uuid,
    pub merged_into: Uuid,
}

// --- /config ---

#[derive(Debug, Deserialize, Serialize)]
pub struct WeightUpdate {
    pub bm25_weight: f64,
    pub vector_weight: f64,
}

// --- /pii ---

#[derive(Debug, Serialize)]
pub struct PiiPerson {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub doc_count: i64,
}

#[derive(Debug, Serialize)]
pub struct PiiChunk {
    pub id: Uuid,
    pub text: String,
    pub doc_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PiiReport {
    pub persons: Vec<PiiPerson>,
    pub pii_chunks: Vec<PiiChunk>,
}
