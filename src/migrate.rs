use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per observed revision; the natural key is unique.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commits (
            id TEXT PRIMARY KEY,
            revision_id TEXT NOT NULL,
            message TEXT NOT NULL,
            author_name TEXT NOT NULL,
            author_email TEXT NOT NULL,
            repository TEXT NOT NULL,
            branch TEXT NOT NULL,
            committed_at TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            analysis_complete INTEGER NOT NULL DEFAULT 0,
            lifecycle_state TEXT NOT NULL DEFAULT 'new',
            UNIQUE(repository, revision_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one current annotation per commit
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commit_analyses (
            commit_id TEXT PRIMARY KEY,
            categories_json TEXT NOT NULL DEFAULT '[]',
            priority TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            sentiment_score REAL NOT NULL,
            sentiment_label TEXT NOT NULL,
            insights_json TEXT NOT NULL DEFAULT '[]',
            produced_at INTEGER NOT NULL,
            FOREIGN KEY (commit_id) REFERENCES commits(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commit_files (
            commit_id TEXT NOT NULL,
            file_index INTEGER NOT NULL,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_extension TEXT,
            change_type TEXT NOT NULL,
            additions INTEGER NOT NULL DEFAULT 0,
            deletions INTEGER NOT NULL DEFAULT 0,
            changes INTEGER NOT NULL DEFAULT 0,
            patch TEXT,
            PRIMARY KEY (commit_id, file_index),
            FOREIGN KEY (commit_id) REFERENCES commits(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create checkpoints table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            repository TEXT PRIMARY KEY,
            last_checked_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_commits_created_at ON commits(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_commits_repository ON commits(repository)")
        .execute(pool)
        .await?;

    Ok(())
}
