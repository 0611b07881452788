use std::sync::Arc;

use axum::{extract::State, response::Json};
use uuid::Uuid;

use super::{internal, unavailable, unprocessable, ApiError};
use crate::core::types::{IngestTextRequest, IngestTextResponse, MAX_INGEST_TEXT_CHARS};
use crate::core::AppState;

// ---------------------------------------------------------------------------
// POST /ingest/text - raw text enters through the drop zone as a Markdown
// file so it flows through the exact same watcher → coordinator path as
// everything else.
// ---------------------------------------------------------------------------

pub async fn ingest_text_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestTextRequest>,
) -> Result<Json<IngestTextResponse>, ApiError> {
    if req.text.is_empty() {
        return Err(unprocessable("text must not be empty"));
    }
    if req.text.chars().count() > MAX_INGEST_TEXT_CHARS {
        return Err(unprocessable(format!(
            "text exceeds {} characters",
            MAX_INGEST_TEXT_CHARS
        )));
    }
    if !state.drop_zone.is_dir() {
        return Err(unavailable("drop zone not available"));
    }

    let doc_id = Uuid::new_v4();
    let file_name = format!("ingest_{}.md", doc_id);
    let path = state.drop_zone.join(&file_name);

    let mut contents = String::from("---\n");
    contents.push_str(&format!("doc_id: {}\n", doc_id));
    for (key, value) in &req.metadata {
        let safe_key: String = key.chars().take(64).map(|c| if c == ':' { '_' } else { c }).collect();
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let safe_value: String = rendered.chars().take(1000).map(|c| if c == '\n' { ' ' } else { c }).collect();
        contents.push_str(&format!("{}: {}\n", safe_key, safe_value));
    }
    contents.push_str("---\n");
    contents.push_str(&req.text);

    tokio::fs::write(&path, contents).await.map_err(|e| {
        tracing::error!("ingest text write failed: {}", e);
        internal("failed to write to drop zone")
    })?;

    tracing::info!(
        "ingest text queued: doc_id={} file={} text_len={}",
        doc_id,
        file_name,
        req.text.len()
    );
    Ok(Json(IngestTextResponse {
        queued: true,
        doc_id,
        file: file_name,
    }))
}
