use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the schema. Idempotent; `archlens init` runs this and it is safe
/// to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Job records. The full job (request, stage history, result, error) is
    // one JSON document written atomically per update, so readers never
    // observe a stage list inconsistent with the status. The scalar columns
    // exist for filtering and ordering only.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            repository_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            record TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ingested repository snapshots, fetched by the pipeline's first stage.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            repository_id TEXT NOT NULL,
            path TEXT NOT NULL,
            content TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            PRIMARY KEY (repository_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding vectors; rowid preserves insertion order for tie-breaking.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            embedding_id TEXT NOT NULL UNIQUE,
            repository_id TEXT NOT NULL,
            source_id TEXT,
            model TEXT NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_repository ON jobs(repository_id, status, updated_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_repository ON embeddings(repository_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
