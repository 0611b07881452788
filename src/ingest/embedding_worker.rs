use std::time::Duration;

use pgvector::Vector;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::config::load_runtime_config;
use crate::core::embed::{EmbedClient, EMBED_BATCH_SIZE};
use crate::ingest::chunker::MAX_CHUNK_CHARS;
use crate::ingest::sleep_or_stop;

// ---------------------------------------------------------------------------
// Embedding worker. Claims pending chunks under FOR UPDATE SKIP LOCKED so
// any number of workers can share one store; the claim, the endpoint call
// and the status writes live in a single transaction, so an aborted
// iteration returns its chunks to pending on rollback.
// ---------------------------------------------------------------------------

pub const EMBED_POLL_INTERVAL: Duration = Duration::from_secs(1);
const CONSECUTIVE_ERROR_THRESHOLD: u32 = 10;
const CIRCUIT_BREAKER_BACKOFF: Duration = Duration::from_secs(60);

const CLAIM_SQL: &str = "UPDATE chunks SET embedding_status = 'processing'
     WHERE id IN (
         SELECT id FROM chunks
         WHERE embedding_status = 'pending'
         ORDER BY id
         LIMIT $1
         FOR UPDATE SKIP LOCKED
     )
     RETURNING id, text, retry_count";

#[derive(sqlx::FromRow)]
struct ClaimedChunk {
    id: Uuid,
    text: String,
    retry_count: i32,
}

pub async fn run_embedding_worker(
    pool: PgPool,
    embed: EmbedClient,
    mut stop: watch::Receiver<bool>,
) {
    tracing::info!("embedding worker started");
    let mut consecutive_errors: u32 = 0;

    loop {
        if *stop.borrow() {
            break;
        }
        match run_iteration(&pool, &embed).await {
            Ok(claimed) => {
                consecutive_errors = 0;
                if claimed == 0 && sleep_or_stop(EMBED_POLL_INTERVAL, &mut stop).await {
                    break;
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= CONSECUTIVE_ERROR_THRESHOLD {
                    tracing::error!(
                        "embedding circuit breaker open after {} consecutive errors: {} — backing off {}s",
                        consecutive_errors,
                        e,
                        CIRCUIT_BREAKER_BACKOFF.as_secs()
                    );
                    if sleep_or_stop(CIRCUIT_BREAKER_BACKOFF, &mut stop).await {
                        break;
                    }
                    consecutive_errors = 0;
                } else {
                    tracing::error!(
                        "embedding worker error ({} consecutive): {}",
                        consecutive_errors,
                        e
                    );
                    if sleep_or_stop(EMBED_POLL_INTERVAL * 5, &mut stop).await {
                        break;
                    }
                }
            }
        }
    }
    tracing::info!("embedding worker stopped");
}

/// One claim-embed-write cycle. Returns how many chunks were claimed.
async fn run_iteration(pool: &PgPool, embed: &EmbedClient) -> anyhow::Result<usize> {
    let cfg = load_runtime_config(pool).await;

    let mut tx = pool.begin().await?;
    let rows: Vec<ClaimedChunk> = sqlx::query_as(CLAIM_SQL)
        .bind(EMBED_BATCH_SIZE)
        .fetch_all(&mut *tx)
        .await?;
    if rows.is_empty() {
        tx.commit().await?;
        return Ok(0);
    }

    let texts: Vec<String> = rows
        .iter()
        .map(|r| truncate_for_embed(&r.text, MAX_CHUNK_CHARS))
        .collect();

    let started = std::time::Instant::now();
    let mut batch_error: Option<String> = None;
    match embed.embed_batch(&cfg.embed_model, &texts).await {
        Ok(embeddings) => {
            for (row, emb) in rows.iter().zip(embeddings) {
                mark_done(&mut tx, row.id, emb).await?;
            }
            tracing::info!(
                "embeddings written: count={} elapsed_ms={}",
                rows.len(),
                started.elapsed().as_millis()
            );
        }
        Err(e) if e.is_context_overflow() && rows.len() > 1 => {
            // Batch-level overflow - fall back to one-at-a-time so only the
            // offending inputs pay the retry.
            tracing::warn!("batch overflow on {} inputs, falling back to singles", rows.len());
            for (row, text) in rows.iter().zip(&texts) {
                match embed
                    .embed_batch(&cfg.embed_model, std::slice::from_ref(text))
                    .await
                {
                    Ok(mut embs) => mark_done(&mut tx, row.id, embs.remove(0)).await?,
                    Err(inner) => {
                        bump_retry(&mut tx, row, cfg.embed_retry_max).await?;
                        tracing::warn!(
                            "chunk embed failed: id={} chars={} retry_count={} error={}",
                            row.id,
                            text.chars().count(),
                            row.retry_count + 1,
                            inner
                        );
                    }
                }
            }
        }
        Err(e) => {
            for row in &rows {
                bump_retry(&mut tx, row, cfg.embed_retry_max).await?;
            }
            batch_error = Some(e.to_string());
        }
    }

    let claimed = rows.len();
    tx.commit().await?;
    // Surface whole-batch failures to the outer loop so a dead endpoint
    // trips the circuit breaker instead of spinning through retries.
    if let Some(e) = batch_error {
        anyhow::bail!("embedding batch of {} failed: {}", claimed, e);
    }
    Ok(claimed)
}

async fn mark_done(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    embedding: Vec<f32>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE chunks
         SET embedding = $1, embedded_at = now(), embedding_status = 'done'
         WHERE id = $2",
    )
    .bind(Vector::from(embedding))
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Failed is terminal: a chunk at `retry_max` never goes back to pending.
async fn bump_retry(
    tx: &mut Transaction<'_, Postgres>,
    row: &ClaimedChunk,
    retry_max: i32,
) -> Result<(), sqlx::Error> {
    let new_count = row.retry_count + 1;
    let new_status = if new_count >= retry_max { "failed" } else { "pending" };
    sqlx::query("UPDATE chunks SET embedding_status = $1, retry_count = $2 WHERE id = $3")
        .bind(new_status)
        .bind(new_count)
        .bind(row.id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Safety net: chunks out of the chunker already respect the ceiling, but
/// legacy rows may not. Cuts at the last space before the limit.
fn truncate_for_embed(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    let cut = match truncated.rfind(' ') {
        Some(pos) if pos > truncated.len() / 2 => truncated[..pos].to_string(),
        _ => truncated,
    };
    tracing::warn!(
        "chunk truncated for embedding: original_chars={} truncated_chars={}",
        text.chars().count(),
        cut.chars().count()
    );
    cut
}
