use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::OnceCell;

// ---------------------------------------------------------------------------
// Process-wide Postgres pool. init → get → close; close is idempotent.
// The pool is the only cross-task serialization point in the process.
// ---------------------------------------------------------------------------

static POOL: OnceCell<PgPool> = OnceCell::const_new();

const POOL_MIN: u32 = 2;
const POOL_MAX: u32 = 5;
const ACQUIRE_TIMEOUT_SECS: u64 = 10;
const STATEMENT_TIMEOUT: &str = "30s";
const IDLE_IN_TX_TIMEOUT: &str = "60s";

async fn build_pool() -> Result<PgPool> {
    let url = std::env::var(crate::core::config::ENV_DATABASE_URL)
        .context("DATABASE_URL is not set")?;

    let pool = PgPoolOptions::new()
        .min_connections(POOL_MIN)
        .max_connections(POOL_MAX)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                use sqlx::Executor;
                let sql = format!(
                    "SET statement_timeout = '{STATEMENT_TIMEOUT}'; \
                     SET idle_in_transaction_session_timeout = '{IDLE_IN_TX_TIMEOUT}'"
                );
                conn.execute(sqlx::AssertSqlSafe(sql)).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    // Vector + trigram extensions must exist before migrations create the
    // ANN and full-text indexes.
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(&pool)
        .await
        .context("failed to create vector extension")?;
    sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
        .execute(&pool)
        .await
        .context("failed to create pg_trgm extension")?;

    tracing::info!("postgres pool opened (max {} connections)", POOL_MAX);
    Ok(pool)
}

/// Return the shared pool, creating it on first use.
pub async fn get_pool() -> Result<&'static PgPool> {
    POOL.get_or_try_init(build_pool).await
}

/// Drain the pool on shutdown. Safe to call more than once.
pub async fn close_pool() {
    if let Some(pool) = POOL.get() {
        pool.close().await;
        tracing::info!("postgres pool closed");
    }
}

/// Run pending sqlx migrations from `./migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("database migration failed")?;
    Ok(())
}
