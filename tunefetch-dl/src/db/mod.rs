//! Durable job history (SQLite)

pub mod history;

pub use history::{failed_tracks_csv, HistoryStore, JobSummary, UnitSummary};

use sqlx::SqlitePool;
use std::path::Path;
use tunefetch_common::Result;

/// Open (creating if needed) the history database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the history tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_history (
            job_id TEXT PRIMARY KEY,
            raw_input TEXT NOT NULL,
            kind TEXT NOT NULL,
            state TEXT NOT NULL,
            playlist_name TEXT,
            units TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            completed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_history_completed_at ON job_history (completed_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (job_history)");

    Ok(())
}
