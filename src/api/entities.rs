use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{bad_request, conflict, internal, not_found, unprocessable, ApiError};
use crate::core::config;
use crate::core::types::{
    EntityType, HardDeleteResponse, MergeRequest, MergeResponse, SoftDeleteResponse,
    UpdateRequest, UpdateResponse,
};
use crate::core::AppState;
use crate::ingest::entity_resolution::{
    check_canary_guard, score_pair_b, CanaryViolation, PRODUCTION_THRESHOLD,
};

// ---------------------------------------------------------------------------
// Entity lifecycle: soft-delete with outbox invalidation, retention-gated
// hard-delete with a JSONL receipt, manual merges guarded by the canary
// list, and the bidirectional update path where the server timestamp wins.
// ---------------------------------------------------------------------------

const PERSON_UPDATABLE: &[&str] = &["display_name", "email", "pii"];
const DOCUMENT_UPDATABLE: &[&str] = &["source_path"];

fn parse_entity_type(raw: &str) -> Result<EntityType, ApiError> {
    EntityType::parse(raw)
        .ok_or_else(|| bad_request(format!("Invalid entity_type: {} (document|person)", raw)))
}

// --- Soft delete -----------------------------------------------------------

pub async fn soft_delete_handler(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<SoftDeleteResponse>, ApiError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let now = Utc::now();

    let mut tx = state.pool.begin().await.map_err(internal)?;
    let updated: Option<(Uuid,)> = sqlx::query_as(sqlx::AssertSqlSafe(format!(
        "UPDATE {} SET deleted_at = $1 WHERE id = $2 AND deleted_at IS NULL RETURNING id",
        entity_type.table()
    )))
    .bind(now)
    .bind(entity_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(internal)?;
    if updated.is_none() {
        return Err(not_found(format!(
            "{:?} {} not found or already deleted",
            entity_type, entity_id
        )));
    }

    // Graph edges get invalid_at via the drainer - same transaction.
    sqlx::query("INSERT INTO outbox (event_type, payload) VALUES ('entity_deleted', $1)")
        .bind(json!({
            "entity_type": entity_type,
            "entity_id": entity_id,
            "deleted_at": now.to_rfc3339(),
        }))
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    tracing::info!("entity soft-deleted: {:?} {}", entity_type, entity_id);
    Ok(Json(SoftDeleteResponse {
        id: entity_id,
        entity_type,
        deleted_at: now.to_rfc3339(),
    }))
}

// --- Hard delete -----------------------------------------------------------

#[derive(Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    confirm: bool,
}

pub async fn hard_delete_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConfirmParams>,
) -> Result<Json<HardDeleteResponse>, ApiError> {
    if !params.confirm {
        return Err(bad_request(
            "Pass confirm=true to execute hard delete. This is irreversible.",
        ));
    }

    let cutoff = Utc::now() - chrono::Duration::days(config::retention_days());

    let mut tx = state.pool.begin().await.map_err(internal)?;
    let doc_ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM documents WHERE deleted_at < $1")
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal)?;
    let person_ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM persons WHERE deleted_at < $1")
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal)?;
    let doc_ids: Vec<Uuid> = doc_ids.into_iter().map(|(id,)| id).collect();
    let person_ids: Vec<Uuid> = person_ids.into_iter().map(|(id,)| id).collect();

    let (chunk_count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM chunks WHERE doc_id = ANY($1)")
            .bind(&doc_ids)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;

    // Chunks cascade on the FK.
    let docs_deleted = sqlx::query("DELETE FROM documents WHERE deleted_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(internal)?
        .rows_affected();
    let persons_deleted = sqlx::query("DELETE FROM persons WHERE deleted_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(internal)?
        .rows_affected();

    for id in doc_ids.iter().chain(person_ids.iter()) {
        sqlx::query("INSERT INTO outbox (event_type, payload) VALUES ('entity_hard_deleted', $1)")
            .bind(json!({ "entity_id": id }))
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
    }
    tx.commit().await.map_err(internal)?;

    let log_path = config::deletion_log_path();
    write_receipt(&log_path, &doc_ids, &person_ids)
        .await
        .map_err(internal)?;

    tracing::info!(
        "hard delete complete: documents={} persons={} chunks={}",
        docs_deleted,
        persons_deleted,
        chunk_count
    );
    Ok(Json(HardDeleteResponse {
        deleted_documents: docs_deleted,
        deleted_persons: persons_deleted,
        deleted_chunks: chunk_count as u64,
        log_path: log_path.to_string_lossy().to_string(),
    }))
}

/// One JSON object per line, appended.
async fn write_receipt(
    log_path: &std::path::Path,
    doc_ids: &[Uuid],
    person_ids: &[Uuid],
) -> std::io::Result<()> {
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let receipt = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "doc_ids": doc_ids,
        "person_ids": person_ids,
    });
    let mut line = receipt.to_string();
    line.push('\n');

    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

// --- Merge -----------------------------------------------------------------

pub async fn merge_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, ApiError> {
    let now = Utc::now();

    let survivor: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM persons WHERE display_name = $1 AND deleted_at IS NULL LIMIT 1",
    )
    .bind(&req.name_a)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal)?;
    let loser: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
        "SELECT id, merged_into FROM persons WHERE display_name = $1 AND deleted_at IS NULL LIMIT 1",
    )
    .bind(&req.name_b)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal)?;

    let (Some((survivor_id,)), Some((loser_id, loser_merged_into))) = (survivor, loser) else {
        return Err(not_found("One or both persons not found"));
    };
    if survivor_id == loser_id {
        return Err(bad_request("Cannot merge a person into itself"));
    }
    // A person already merged away is never a merge source again.
    if loser_merged_into.is_some() {
        return Err(conflict(format!(
            "{} is already merged into another person",
            req.name_b
        )));
    }

    let mut tx = state.pool.begin().await.map_err(internal)?;
    sqlx::query("UPDATE persons SET merged_into = $1, updated_at = now() WHERE id = $2")
        .bind(survivor_id)
        .bind(loser_id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    sqlx::query("INSERT INTO outbox (event_type, payload) VALUES ('person_merged', $1)")
        .bind(json!({
            "merged_from": loser_id,
            "merged_into": survivor_id,
            "merged_at": now.to_rfc3339(),
        }))
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    tx.commit().await.map_err(internal)?;

    tracing::info!("persons merged: {} -> {}", loser_id, survivor_id);
    Ok(Json(MergeResponse {
        merged_from: loser_id,
        merged_into: survivor_id,
    }))
}

// --- Merge candidates ------------------------------------------------------

#[derive(Serialize)]
pub struct MergeCandidate {
    pub id_a: Uuid,
    pub name_a: String,
    pub id_b: Uuid,
    pub name_b: String,
    pub score: f64,
    pub same_domain: bool,
    pub shared_docs: usize,
}

#[derive(Serialize)]
pub struct MergeCandidatesResponse {
    pub candidates: Vec<MergeCandidate>,
    /// Known-distinct pairs scoring over the threshold - an operator alert
    /// that blocks auto-merge when non-empty.
    pub canary_violations: Vec<CanaryViolation>,
}

pub async fn merge_candidates_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MergeCandidatesResponse>, ApiError> {
    let persons: Vec<(Uuid, Option<String>, String)> = sqlx::query_as(
        "SELECT id, display_name, email FROM persons
         WHERE deleted_at IS NULL AND merged_into IS NULL
         ORDER BY display_name
         LIMIT 200",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal)?;

    let sender_docs: Vec<(String, Uuid)> = sqlx::query_as(
        "SELECT metadata->>'sender_email' AS email, id FROM documents
         WHERE deleted_at IS NULL AND metadata->>'sender_email' IS NOT NULL",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal)?;
    let mut email_to_docs: HashMap<String, HashSet<Uuid>> = HashMap::new();
    for (email, doc_id) in sender_docs {
        email_to_docs.entry(email).or_default().insert(doc_id);
    }

    let mut candidates = Vec::new();
    for (i, a) in persons.iter().enumerate() {
        for b in persons.iter().skip(i + 1) {
            let name_a = a.1.clone().unwrap_or_default();
            let name_b = b.1.clone().unwrap_or_default();
            let docs_a = email_to_docs.get(&a.2);
            let docs_b = email_to_docs.get(&b.2);
            let shared_docs = match (docs_a, docs_b) {
                (Some(da), Some(db)) => da.intersection(db).count(),
                _ => 0,
            };
            let score = score_pair_b(&name_a, &a.2, &name_b, &b.2, shared_docs as u32);
            if score >= PRODUCTION_THRESHOLD {
                let same_domain = match (a.2.rsplit_once('@'), b.2.rsplit_once('@')) {
                    (Some((_, da)), Some((_, db))) => da.eq_ignore_ascii_case(db),
                    _ => false,
                };
                candidates.push(MergeCandidate {
                    id_a: a.0,
                    name_a,
                    id_b: b.0,
                    name_b,
                    score: (score * 1000.0).round() / 1000.0,
                    same_domain,
                    shared_docs,
                });
            }
        }
    }

    Ok(Json(MergeCandidatesResponse {
        candidates,
        canary_violations: check_canary_guard(PRODUCTION_THRESHOLD),
    }))
}

// --- Bidirectional update --------------------------------------------------

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let now = Utc::now();

    let client_ts = DateTime::parse_from_rfc3339(&req.client_updated_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| unprocessable(format!("Invalid client_updated_at: {}", e)))?;

    let allowed: &[&str] = match entity_type {
        EntityType::Person => PERSON_UPDATABLE,
        EntityType::Document => DOCUMENT_UPDATABLE,
    };
    // Documents route unknown keys into the metadata map; persons reject them.
    let (safe_diffs, extra_meta): (Vec<(&String, &serde_json::Value)>, Vec<(&String, &serde_json::Value)>) =
        req.diffs
            .iter()
            .partition(|(k, _)| allowed.contains(&k.as_str()));
    if entity_type == EntityType::Person && !extra_meta.is_empty() {
        return Err(bad_request(format!(
            "Unknown fields for person: {:?}. Allowed: {:?}",
            extra_meta.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            allowed
        )));
    }
    if safe_diffs.is_empty() && extra_meta.is_empty() {
        return Err(bad_request(format!(
            "No updatable fields provided. Allowed: {:?}",
            allowed
        )));
    }

    let mut tx = state.pool.begin().await.map_err(internal)?;
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(sqlx::AssertSqlSafe(format!(
        "SELECT updated_at FROM {} WHERE id = $1 AND deleted_at IS NULL",
        entity_type.table()
    )))
    .bind(entity_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(internal)?;
    let Some((server_ts,)) = row else {
        return Err(not_found(format!("{:?} {} not found", entity_type, entity_id)));
    };

    let conflict_detected = server_ts > client_ts;
    let mut updated_fields: Vec<String> = Vec::new();

    if !conflict_detected {
        match entity_type {
            EntityType::Person => {
                for (key, value) in &safe_diffs {
                    match (key.as_str(), value) {
                        ("display_name", serde_json::Value::String(s)) => {
                            sqlx::query("UPDATE persons SET display_name = $1 WHERE id = $2")
                                .bind(s)
                                .bind(entity_id)
                                .execute(&mut *tx)
                                .await
                                .map_err(internal)?;
                        }
                        ("email", serde_json::Value::String(s)) => {
                            sqlx::query("UPDATE persons SET email = $1 WHERE id = $2")
                                .bind(s.to_lowercase())
                                .bind(entity_id)
                                .execute(&mut *tx)
                                .await
                                .map_err(internal)?;
                        }
                        ("pii", value) => {
                            let flag = match value {
                                serde_json::Value::Bool(b) => *b,
                                serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
                                _ => continue,
                            };
                            sqlx::query("UPDATE persons SET pii = $1 WHERE id = $2")
                                .bind(flag)
                                .bind(entity_id)
                                .execute(&mut *tx)
                                .await
                                .map_err(internal)?;
                        }
                        _ => continue,
                    }
                    updated_fields.push(key.to_string());
                }
                sqlx::query("UPDATE persons SET updated_at = $1 WHERE id = $2")
                    .bind(now)
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
            }
            EntityType::Document => {
                for (key, value) in &safe_diffs {
                    if key.as_str() == "source_path" {
                        if let serde_json::Value::String(s) = value {
                            sqlx::query("UPDATE documents SET source_path = $1 WHERE id = $2")
                                .bind(s)
                                .bind(entity_id)
                                .execute(&mut *tx)
                                .await
                                .map_err(internal)?;
                            updated_fields.push(key.to_string());
                        }
                    }
                }
                if !extra_meta.is_empty() {
                    let mut patch = serde_json::Map::new();
                    for (k, v) in &extra_meta {
                        patch.insert((*k).clone(), (*v).clone());
                        updated_fields.push((*k).clone());
                    }
                    sqlx::query("UPDATE documents SET metadata = metadata || $1 WHERE id = $2")
                        .bind(serde_json::Value::Object(patch))
                        .bind(entity_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(internal)?;
                }
                sqlx::query("UPDATE documents SET updated_at = $1 WHERE id = $2")
                    .bind(now)
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
            }
        }

        // Property diffs flow to the graph via the drainer.
        let diff_map: serde_json::Map<String, serde_json::Value> = req
            .diffs
            .iter()
            .filter(|(k, _)| updated_fields.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        sqlx::query("INSERT INTO outbox (event_type, payload) VALUES ('entity_updated', $1)")
            .bind(json!({
                "entity_type": entity_type,
                "entity_id": entity_id,
                "diffs": diff_map,
                "updated_at": now.to_rfc3339(),
            }))
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
    }
    tx.commit().await.map_err(internal)?;

    tracing::info!(
        "entity update: {:?} {} conflict={} fields={:?}",
        entity_type,
        entity_id,
        conflict_detected,
        updated_fields
    );
    Ok(Json(UpdateResponse {
        id: entity_id,
        entity_type,
        updated_fields,
        conflict_detected,
        server_updated_at: if conflict_detected {
            server_ts.to_rfc3339()
        } else {
            now.to_rfc3339()
        },
    }))
}
