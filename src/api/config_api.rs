use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{internal, not_found, unprocessable, ApiError};
use crate::core::config::load_runtime_config;
use crate::core::types::{PiiChunk, PiiPerson, PiiReport, WeightUpdate, MAX_REDACT_BATCH};
use crate::core::AppState;

// ---------------------------------------------------------------------------
// Runtime config read/write plus the PII operator surface (report,
// mark-public, bulk redact).
// ---------------------------------------------------------------------------

pub async fn get_config_handler(
    State(state): State<Arc<AppState>>,
) -> Json<std::collections::HashMap<&'static str, serde_json::Value>> {
    Json(load_runtime_config(&state.pool).await.to_map())
}

pub async fn update_config_handler(
    State(state): State<Arc<AppState>>,
    Json(weights): Json<WeightUpdate>,
) -> Result<Json<WeightUpdate>, ApiError> {
    let in_range = |w: f64| (0.0..=1.0).contains(&w);
    if !in_range(weights.bm25_weight) || !in_range(weights.vector_weight) {
        return Err(unprocessable("Weights must be between 0.0 and 1.0"));
    }

    for (key, value) in [
        ("bm25_weight", weights.bm25_weight),
        ("vector_weight", weights.vector_weight),
    ] {
        sqlx::query("UPDATE config SET value = $1, updated_at = now() WHERE key = $2")
            .bind(value.to_string())
            .bind(key)
            .execute(&state.pool)
            .await
            .map_err(internal)?;
    }
    tracing::info!(
        "config updated: bm25_weight={} vector_weight={}",
        weights.bm25_weight,
        weights.vector_weight
    );
    Ok(Json(weights))
}

// --- PII surface -----------------------------------------------------------

pub async fn pii_report_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PiiReport>, ApiError> {
    let persons: Vec<(Uuid, Option<String>, String, i64)> = sqlx::query_as(
        "SELECT p.id, p.display_name, p.email, COUNT(DISTINCT d.id) AS doc_count
         FROM persons p
         LEFT JOIN documents d
           ON d.metadata->>'sender_email' = p.email AND d.deleted_at IS NULL
         WHERE p.pii = true AND p.deleted_at IS NULL
         GROUP BY p.id, p.display_name, p.email
         ORDER BY doc_count DESC
         LIMIT 100",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal)?;

    let chunks: Vec<(Uuid, String, Uuid)> = sqlx::query_as(
        "SELECT c.id, c.text, c.doc_id
         FROM chunks c
         JOIN documents d ON d.id = c.doc_id
         WHERE c.pii_detected = true AND d.deleted_at IS NULL
         ORDER BY c.id
         LIMIT 200",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal)?;

    Ok(Json(PiiReport {
        persons: persons
            .into_iter()
            .map(|(id, display_name, email, doc_count)| PiiPerson {
                id,
                display_name: display_name.unwrap_or_default(),
                email,
                doc_count,
            })
            .collect(),
        pii_chunks: chunks
            .into_iter()
            .map(|(id, text, doc_id)| PiiChunk {
                id,
                text: text.chars().take(200).collect(),
                doc_id,
            })
            .collect(),
    }))
}

/// Mark a person as a public figure - clears the PII flag.
pub async fn mark_public_handler(
    State(state): State<Arc<AppState>>,
    Path(person_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated: Option<(Uuid,)> = sqlx::query_as(
        "UPDATE persons SET pii = false, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL RETURNING id",
    )
    .bind(person_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal)?;
    if updated.is_none() {
        return Err(not_found("Person not found"));
    }
    Ok(Json(serde_json::json!({ "person_id": person_id, "pii": false })))
}

#[derive(Deserialize)]
pub struct RedactParams {
    batch_size: Option<i64>,
}

/// Rewrite every flagged chunk to `[REDACTED]` in bounded batches.
pub async fn bulk_redact_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RedactParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch_size = params.batch_size.unwrap_or(1000).clamp(1, MAX_REDACT_BATCH);
    let mut total: u64 = 0;
    loop {
        let affected = sqlx::query(
            "UPDATE chunks SET text = '[REDACTED]'
             WHERE id IN (
                 SELECT id FROM chunks
                 WHERE pii_detected = true AND text != '[REDACTED]'
                 LIMIT $1
             )",
        )
        .bind(batch_size)
        .execute(&state.pool)
        .await
        .map_err(internal)?
        .rows_affected();
        total += affected;
        if (affected as i64) < batch_size {
            break;
        }
    }
    tracing::info!("bulk redact complete: count={}", total);
    Ok(Json(serde_json::json!({ "redacted": total })))
}
