use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::core::AppState;
use crate::ingest::watcher::{self, ProcessOutcome};

// ---------------------------------------------------------------------------
// Dead-letter retry. Re-runs intake for parked files with a bounded attempt
// budget; recovered rows are deleted, the rest keep accumulating attempts.
// ---------------------------------------------------------------------------

pub const MAX_RETRIES: i32 = 3;

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    file_path: String,
    attempts: i32,
}

/// Re-process every retryable dead_letter row. Returns the count of
/// recovered files.
pub async fn retry_dead_letters(state: &Arc<AppState>) -> anyhow::Result<usize> {
    let rows: Vec<DeadLetterRow> =
        sqlx::query_as("SELECT id, file_path, attempts FROM dead_letter ORDER BY last_attempt")
            .fetch_all(&state.pool)
            .await?;

    let mut recovered = 0usize;
    for row in rows {
        if row.attempts > MAX_RETRIES {
            continue;
        }
        match watcher::process_file(state, Path::new(&row.file_path)).await {
            Ok(ProcessOutcome::Ingested(_)) | Ok(ProcessOutcome::Duplicate) => {
                sqlx::query("DELETE FROM dead_letter WHERE id = $1")
                    .bind(row.id)
                    .execute(&state.pool)
                    .await?;
                recovered += 1;
                tracing::info!("dead letter recovered: {}", row.file_path);
            }
            Ok(ProcessOutcome::DeadLettered) => {
                bump_attempt(&state.pool, row.id, "still unparseable").await?;
            }
            Err(e) => {
                bump_attempt(&state.pool, row.id, &e.to_string()).await?;
            }
        }
    }
    tracing::info!("dead-letter retry pass complete: recovered={}", recovered);
    Ok(recovered)
}

async fn bump_attempt(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE dead_letter SET attempts = attempts + 1, last_attempt = now(), error = $1
         WHERE id = $2",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
