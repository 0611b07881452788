pub mod fusion;
pub mod rerank;

use std::collections::HashMap;
use std::time::Instant;

use pgvector::Vector;
use uuid::Uuid;

use crate::core::config::load_runtime_config;
use crate::core::types::{SearchResponse, SearchResult};
use crate::core::AppState;
use fusion::{rrf_merge, weighted_merge};
use rerank::MIN_RERANK_CANDIDATES;

// ---------------------------------------------------------------------------
// Hybrid search pipeline: cache → lexical top-50 → vector top-50 → fusion →
// over-fetch + hydrate → rerank → top-N. Every optional stage that fails
// flips degraded=true instead of failing the query.
// ---------------------------------------------------------------------------

const CANDIDATE_LIMIT: i64 = 50;
const SNIPPET_CHARS: usize = 200;

/// Cached response with its own expiry; the moka TTL is only an eviction
/// upper bound, the per-entry deadline follows the config table.
#[derive(Clone)]
pub struct CachedSearch {
    pub expires_at: Instant,
    pub response: SearchResponse,
}

#[derive(sqlx::FromRow)]
struct HydratedChunk {
    id: Uuid,
    text: String,
    doc_id: Uuid,
    source_path: String,
    sender: String,
}

pub async fn search(state: &AppState, q: &str, limit: usize) -> anyhow::Result<SearchResponse> {
    let started = Instant::now();
    let cache_key = (q.to_string(), limit);
    if let Some(hit) = state.search_cache.get(&cache_key).await {
        if hit.expires_at > Instant::now() {
            tracing::info!("search cache hit: query={}", truncate_log(q));
            return Ok(hit.response);
        }
        state.search_cache.invalidate(&cache_key).await;
    }

    tracing::info!("search started: query={} limit={}", truncate_log(q), limit);
    let cfg = load_runtime_config(&state.pool).await;
    let mut degraded = false;

    // Lexical retrieval.
    let lex_results: Vec<(Uuid, f64)> = sqlx::query_as(
        "SELECT c.id, ts_rank(c.tsv, plainto_tsquery('english', $1))::float8 AS score
         FROM chunks c
         JOIN documents d ON d.id = c.doc_id
         WHERE c.tsv @@ plainto_tsquery('english', $1)
           AND c.embedding_status = 'done'
           AND c.pii_detected = false
           AND d.deleted_at IS NULL
         ORDER BY score DESC
         LIMIT $2",
    )
    .bind(q)
    .bind(CANDIDATE_LIMIT)
    .fetch_all(&state.pool)
    .await?;
    let lex_ids: Vec<Uuid> = lex_results.iter().map(|(id, _)| *id).collect();
    let lex_scores: HashMap<Uuid, f64> = lex_results.iter().copied().collect();

    // Vector retrieval - skipped (degraded) when the query embedding fails.
    let mut vec_results: Vec<(Uuid, f64)> = Vec::new();
    match state.embed.embed_query(&cfg.embed_model, q).await {
        Some(embedding) => {
            vec_results = sqlx::query_as(
                "SELECT c.id, (1 - (c.embedding <=> $1))::float8 AS score
                 FROM chunks c
                 JOIN documents d ON d.id = c.doc_id
                 WHERE c.embedding IS NOT NULL
                   AND c.embedding_status = 'done'
                   AND c.pii_detected = false
                   AND d.deleted_at IS NULL
                 ORDER BY c.embedding <=> $1
                 LIMIT $2",
            )
            .bind(Vector::from(embedding))
            .bind(CANDIDATE_LIMIT)
            .fetch_all(&state.pool)
            .await?;
        }
        None => degraded = true,
    }
    let vec_ids: Vec<Uuid> = vec_results.iter().map(|(id, _)| *id).collect();
    let vec_scores: HashMap<Uuid, f64> = vec_results.iter().copied().collect();

    // Fusion.
    let merged = if cfg.use_weighted_fusion() && !vec_results.is_empty() {
        weighted_merge(&lex_results, &vec_results, cfg.bm25_weight, cfg.vector_weight)
    } else {
        rrf_merge(&lex_ids, &vec_ids, cfg.rrf_k)
    };

    // Over-fetch for the reranker, then hydrate.
    let top_ids: Vec<Uuid> = merged.into_iter().take(limit * 5).collect();
    let hydrated: Vec<HydratedChunk> = if top_ids.is_empty() {
        Vec::new()
    } else {
        sqlx::query_as(
            "SELECT c.id, c.text, c.doc_id, d.source_path, COALESCE(p.email, '—') AS sender
             FROM chunks c
             JOIN documents d ON d.id = c.doc_id
             LEFT JOIN persons p ON p.email = d.metadata->>'sender_email'
             WHERE c.id = ANY($1) AND d.deleted_at IS NULL",
        )
        .bind(&top_ids)
        .fetch_all(&state.pool)
        .await?
    };
    let details: HashMap<Uuid, HydratedChunk> =
        hydrated.into_iter().map(|h| (h.id, h)).collect();
    // Ids the hydrate step did not return (deleted mid-flight) drop silently.
    let mut valid_ids: Vec<Uuid> = top_ids
        .iter()
        .copied()
        .filter(|id| details.contains_key(id))
        .collect();

    // Rerank.
    let snippets: Vec<String> = valid_ids
        .iter()
        .map(|id| details[id].text.clone())
        .collect();
    let mut rerank_scores: HashMap<Uuid, f64> = HashMap::new();
    match state.reranker.score(q, &snippets).await {
        Some(scores) => {
            rerank_scores = valid_ids.iter().copied().zip(scores).collect();
            valid_ids.sort_by(|a, b| {
                rerank_scores[b]
                    .partial_cmp(&rerank_scores[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        None => {
            if valid_ids.len() >= MIN_RERANK_CANDIDATES {
                degraded = true;
            }
        }
    }

    let results: Vec<SearchResult> = valid_ids
        .iter()
        .take(limit)
        .map(|id| {
            let d = &details[id];
            SearchResult {
                chunk_id: *id,
                doc_id: d.doc_id,
                source_path: d.source_path.clone(),
                sender: d.sender.clone(),
                snippet: d.text.chars().take(SNIPPET_CHARS).collect(),
                lex_score: round4(lex_scores.get(id).copied().unwrap_or(0.0)),
                vec_score: round4(vec_scores.get(id).copied().unwrap_or(0.0)),
                rerank_score: round4(rerank_scores.get(id).copied().unwrap_or(0.0)),
            }
        })
        .collect();

    let response = SearchResponse {
        results,
        degraded,
        query: q.to_string(),
    };
    state
        .search_cache
        .insert(
            cache_key,
            CachedSearch {
                expires_at: Instant::now() + std::time::Duration::from_secs(cfg.search_cache_ttl),
                response: response.clone(),
            },
        )
        .await;

    tracing::info!(
        "search completed: results={} degraded={} lex={} vec={} elapsed_ms={}",
        response.results.len(),
        response.degraded,
        lex_ids.len(),
        vec_ids.len(),
        started.elapsed().as_millis()
    );
    Ok(response)
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn truncate_log(q: &str) -> String {
    q.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round4_rounds_half_up() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(0.0), 0.0);
        assert_eq!(round4(1.0), 1.0);
    }

    #[test]
    fn log_truncation_is_bounded() {
        let long = "q".repeat(500);
        assert_eq!(truncate_log(&long).chars().count(), 100);
        assert_eq!(truncate_log("short"), "short");
    }
}
