use std::time::Duration;

use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::config::load_runtime_config;
use crate::core::embed::{EmbedClient, EMBED_BATCH_SIZE};

// ---------------------------------------------------------------------------
// Reindex job - backfills embedding_v2 for a zero-downtime model swap.
// Claims with SKIP LOCKED so concurrent runs split the work. Failed rows
// accrue reindex_attempts and are retired at the retry ceiling, the same
// give-up discipline the embedding worker applies to embedding_status.
// The confirmed swap is gated: it refuses to promote v2 while any done
// chunk still lacks it.
// ---------------------------------------------------------------------------

const REINDEX_BATCH: i64 = 50;
const REINDEX_FAILURE_BACKOFF: Duration = Duration::from_secs(60);
pub const ENV_EMBED_MODEL_V2: &str = "EMBED_MODEL_V2";

#[derive(sqlx::FromRow)]
struct ReindexRow {
    id: Uuid,
    text: String,
}

pub async fn reindex(pool: &PgPool, embed: &EmbedClient, confirm_swap: bool) -> anyhow::Result<()> {
    let cfg = load_runtime_config(pool).await;
    let model = std::env::var(ENV_EMBED_MODEL_V2)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| cfg.embed_model.clone());
    let retry_max = cfg.embed_retry_max;
    tracing::info!("reindex started with model {}", model);

    let mut total = 0usize;
    loop {
        let mut tx = pool.begin().await?;
        let rows: Vec<ReindexRow> = sqlx::query_as(
            "SELECT id, text FROM chunks
             WHERE embedding_v2 IS NULL
               AND embedding_status = 'done'
               AND reindex_attempts < $2
             ORDER BY id
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(REINDEX_BATCH)
        .bind(retry_max)
        .fetch_all(&mut *tx)
        .await?;
        if rows.is_empty() {
            tx.commit().await?;
            break;
        }

        let mut embedded_this_round = 0usize;
        for group in rows.chunks(EMBED_BATCH_SIZE as usize) {
            let texts: Vec<String> = group.iter().map(|r| r.text.clone()).collect();
            match embed.embed_batch(&model, &texts).await {
                Ok(embeddings) => {
                    for (row, emb) in group.iter().zip(embeddings) {
                        sqlx::query("UPDATE chunks SET embedding_v2 = $1 WHERE id = $2")
                            .bind(Vector::from(emb))
                            .bind(row.id)
                            .execute(&mut *tx)
                            .await?;
                        embedded_this_round += 1;
                    }
                }
                Err(e) => {
                    // Attempts accrue per row; the claim predicate retires
                    // rows at the ceiling so they are not re-selected forever.
                    let ids: Vec<Uuid> = group.iter().map(|r| r.id).collect();
                    sqlx::query(
                        "UPDATE chunks SET reindex_attempts = reindex_attempts + 1
                         WHERE id = ANY($1)",
                    )
                    .bind(&ids)
                    .execute(&mut *tx)
                    .await?;
                    tracing::error!("reindex batch of {} failed: {}", ids.len(), e);
                }
            }
        }
        total += embedded_this_round;
        tx.commit().await?;
        tracing::info!("reindex progress: embedded={}", total);

        // A round with zero forward progress means the endpoint is down or
        // rejecting everything. Back off instead of hammering it.
        if embedded_this_round == 0 {
            tracing::warn!(
                "reindex made no progress this round - backing off {}s",
                REINDEX_FAILURE_BACKOFF.as_secs()
            );
            tokio::time::sleep(REINDEX_FAILURE_BACKOFF).await;
        }
    }

    let (retired,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM chunks
         WHERE embedding_v2 IS NULL AND embedding_status = 'done' AND reindex_attempts >= $1",
    )
    .bind(retry_max)
    .fetch_one(pool)
    .await?;
    if retired > 0 {
        tracing::warn!(
            "reindex gave up on {} chunks after {} attempts each",
            retired,
            retry_max
        );
    }
    tracing::info!("reindex complete: total_embedded={}", total);

    if confirm_swap {
        swap_embedding_columns(pool).await?;
        tracing::info!("embedding column swap complete");
    } else {
        tracing::info!("column swap skipped - run with --confirm-swap to promote embedding_v2");
    }
    Ok(())
}

/// Promote v2: v1 drops, v2 takes its name, and a fresh empty v2 column
/// keeps the schema stable for the next upgrade cycle.
///
/// The table lock covers both the coverage check and the rename, so the
/// live embedding worker cannot slip a new done-with-null-v2 row in
/// between. Any done chunk without embedding_v2 aborts the promotion,
/// otherwise those rows would come out of the swap with a null embedding.
async fn swap_embedding_columns(pool: &PgPool) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("LOCK TABLE chunks IN ACCESS EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await?;

    let (missing,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM chunks WHERE embedding_status = 'done' AND embedding_v2 IS NULL",
    )
    .fetch_one(&mut *tx)
    .await?;
    if missing > 0 {
        anyhow::bail!(
            "refusing column swap: {} done chunks still lack embedding_v2 - re-run the backfill first",
            missing
        );
    }

    sqlx::query("ALTER TABLE chunks RENAME COLUMN embedding TO embedding_old")
        .execute(&mut *tx)
        .await?;
    sqlx::query("ALTER TABLE chunks RENAME COLUMN embedding_v2 TO embedding")
        .execute(&mut *tx)
        .await?;
    sqlx::query("ALTER TABLE chunks DROP COLUMN embedding_old")
        .execute(&mut *tx)
        .await?;
    sqlx::query("ALTER TABLE chunks ADD COLUMN embedding_v2 vector(768)")
        .execute(&mut *tx)
        .await?;
    // The next upgrade cycle starts with a clean attempt budget.
    sqlx::query("UPDATE chunks SET reindex_attempts = 0")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
