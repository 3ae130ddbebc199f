//! Authoritative store access for ocrq-jm
//!
//! SQLite is the transactional system of record for jobs and job files.
//! All cross-entity invariants (counter bounds, job/file ownership) are
//! enforced here; the mirror store is only ever written from state that
//! has already committed in this database.

pub mod jobs;
pub mod retry;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!(path = %db_path.display(), "Connecting to database");

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize ocrq-jm tables
///
/// Creates jobs and job_files tables if they don't exist. The CHECK
/// constraints encode the counter invariant
/// `0 <= failed_files <= processed_files <= total_files`.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            queued_at TEXT,
            started_at TEXT,
            finished_at TEXT,
            total_files INTEGER NOT NULL DEFAULT 0,
            processed_files INTEGER NOT NULL DEFAULT 0,
            failed_files INTEGER NOT NULL DEFAULT 0,
            CHECK (failed_files >= 0),
            CHECK (failed_files <= processed_files),
            CHECK (processed_files <= total_files)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_files (
            file_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            object_key TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            queued_at TEXT,
            started_at TEXT,
            finished_at TEXT,
            ocr_text TEXT,
            error_message TEXT,
            FOREIGN KEY (job_id) REFERENCES jobs(job_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_files_job_id ON job_files(job_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (jobs, job_files)");

    Ok(())
}
