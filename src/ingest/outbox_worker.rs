use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use uuid::Uuid;

use crate::graph::GraphSink;
use crate::ingest::sleep_or_stop;

// ---------------------------------------------------------------------------
// Outbox drainer. Rows are marked processed BEFORE the graph write: graph
// mutations are MERGE-idempotent, so replaying after a crash is safer than
// an applied-but-unmarked event being silently dropped. A failed apply
// rolls processed_at back and keeps the attempt, so poison rows eventually
// dead-letter.
// ---------------------------------------------------------------------------

pub const OUTBOX_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const OUTBOX_BATCH_SIZE: i64 = 50;
pub const OUTBOX_MAX_ATTEMPTS: i32 = 10;

const GRAPH_ERROR_THRESHOLD: u32 = 5;
const CIRCUIT_BREAKER_BACKOFF: Duration = Duration::from_secs(60);

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    attempts: i32,
}

pub async fn run_outbox_worker(
    pool: PgPool,
    graph: Arc<dyn GraphSink>,
    mut stop: watch::Receiver<bool>,
) {
    tracing::info!("outbox drainer started");
    let mut consecutive_errors: u32 = 0;

    loop {
        if *stop.borrow() {
            break;
        }
        if let Err(e) = drain_batch(&pool, graph.as_ref(), &mut consecutive_errors, &mut stop).await {
            tracing::error!("outbox drainer error: {}", e);
        }
        if sleep_or_stop(OUTBOX_POLL_INTERVAL, &mut stop).await {
            break;
        }
    }
    tracing::info!("outbox drainer stopped");
}

async fn drain_batch(
    pool: &PgPool,
    graph: &dyn GraphSink,
    consecutive_errors: &mut u32,
    stop: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let rows: Vec<OutboxRow> = sqlx::query_as(
        "SELECT id, event_type, payload, attempts FROM outbox
         WHERE processed_at IS NULL AND NOT failed
         ORDER BY created_at
         LIMIT $1",
    )
    .bind(OUTBOX_BATCH_SIZE)
    .fetch_all(pool)
    .await?;

    for row in rows {
        if *stop.borrow() {
            break;
        }

        if row.attempts >= OUTBOX_MAX_ATTEMPTS {
            sqlx::query("UPDATE outbox SET failed = true, error = 'max attempts exceeded' WHERE id = $1")
                .bind(row.id)
                .execute(pool)
                .await?;
            tracing::warn!("outbox row dead-lettered: id={} type={}", row.id, row.event_type);
            continue;
        }

        // Mark processed first (see module header).
        sqlx::query(
            "UPDATE outbox SET processed_at = now(), attempts = attempts + 1
             WHERE id = $1 AND processed_at IS NULL",
        )
        .bind(row.id)
        .execute(pool)
        .await?;

        let started = std::time::Instant::now();
        match graph.apply(&row.event_type, &row.payload).await {
            Ok(()) => {
                tracing::info!(
                    "outbox event applied: id={} type={} latency_ms={}",
                    row.id,
                    row.event_type,
                    started.elapsed().as_millis()
                );
                *consecutive_errors = 0;
            }
            Err(e) => {
                *consecutive_errors += 1;
                tracing::error!(
                    "outbox event failed: id={} type={} error={} ({} consecutive)",
                    row.id,
                    row.event_type,
                    e,
                    consecutive_errors
                );
                // Roll back the processed mark; attempts stays incremented.
                sqlx::query("UPDATE outbox SET processed_at = NULL, error = $1 WHERE id = $2")
                    .bind(e.to_string())
                    .bind(row.id)
                    .execute(pool)
                    .await?;

                if *consecutive_errors >= GRAPH_ERROR_THRESHOLD {
                    tracing::warn!(
                        "graph circuit breaker open after {} consecutive failures — backing off {}s",
                        consecutive_errors,
                        CIRCUIT_BREAKER_BACKOFF.as_secs()
                    );
                    if sleep_or_stop(CIRCUIT_BREAKER_BACKOFF, stop).await {
                        break;
                    }
                    *consecutive_errors = 0;
                }
            }
        }
    }
    Ok(())
}
