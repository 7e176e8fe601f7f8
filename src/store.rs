//! Durable commit storage.
//!
//! The [`CommitStore`] trait is the single mutation point of the pipeline.
//! [`SqliteCommitStore`] implements it on the schema created by
//! [`migrate`](crate::migrate):
//!
//! | Table | Key | Contents |
//! |-------|-----|----------|
//! | `commits` | `id` (identity token), `UNIQUE(repository, revision_id)` | one row per revision |
//! | `commit_analyses` | `commit_id` | current annotation |
//! | `commit_files` | `(commit_id, file_index)` | file changes from detail fetches |
//! | `checkpoints` | `repository` | last completed ingestion cycle |
//!
//! # Upsert protocol
//!
//! Every upsert runs in one `BEGIN IMMEDIATE` transaction, so the
//! insert-or-update decision and the writes are atomic with respect to other
//! writers on the same database:
//!
//! 1. Resolve the natural key. If a row exists, mark it `updated` and keep its
//!    token, `created_at` and `revision_id`.
//! 2. Otherwise ask the [`IdentityAssigner`] for candidate tokens, drop the
//!    ones already owned by other commits, and insert with
//!    `ON CONFLICT(repository, revision_id) DO NOTHING`. Zero affected rows
//!    means another writer won the insert; the call degrades to an update.
//! 3. Insert or replace the annotation, and the file list when one is given.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;

use crate::config::Config;
use crate::db;
use crate::error::StoreError;
use crate::identity::IdentityAssigner;
use crate::migrate;
use crate::models::{
    Annotation, CommitRecord, FileChange, LifecycleState, Statistics, StoredCommit, UpsertOutcome,
};

/// Upper bound on rows returned by [`CommitStore::list_recent`].
pub const MAX_LIST_LIMIT: i64 = 1000;

/// Keyed storage for commit records, annotations and checkpoints.
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Insert a new record with its annotation, or update the existing record
    /// for the same natural key and replace its annotation.
    ///
    /// `files` replaces the stored file list when non-empty.
    async fn upsert(
        &self,
        record: &CommitRecord,
        annotation: &Annotation,
        files: &[FileChange],
    ) -> Result<UpsertOutcome, StoreError>;

    /// Newest records first, optionally restricted to one repository.
    async fn list_recent(
        &self,
        limit: i64,
        repository: Option<&str>,
    ) -> Result<Vec<StoredCommit>, StoreError>;

    async fn statistics(&self) -> Result<Statistics, StoreError>;

    async fn set_checkpoint(&self, repository: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn checkpoint(&self, repository: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Cheap liveness check of the backing storage.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// SQLite implementation of [`CommitStore`].
pub struct SqliteCommitStore {
    pool: SqlitePool,
    assigner: IdentityAssigner,
}

impl SqliteCommitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            assigner: IdentityAssigner::new(),
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn upsert_in_tx(
        &self,
        conn: &mut SqliteConnection,
        record: &CommitRecord,
        annotation: &Annotation,
        files: &[FileChange],
    ) -> Result<UpsertOutcome> {
        let existing = find_by_natural_key(conn, &record.repository, &record.revision_id).await?;

        let outcome = match existing {
            Some(id) => {
                mark_updated(conn, &id).await?;
                UpsertOutcome::Updated { identity_token: id }
            }
            None => {
                let candidates = self
                    .assigner
                    .candidates(&record.repository, &record.revision_id)?;
                let taken = taken_tokens(conn, &candidates).await?;
                let token = self
                    .assigner
                    .choose(&record.repository, &record.revision_id, &taken)?;

                let inserted = insert_commit(conn, record, &token).await?;
                if inserted {
                    UpsertOutcome::Inserted {
                        identity_token: token,
                    }
                } else {
                    let id = find_by_natural_key(conn, &record.repository, &record.revision_id)
                        .await?
                        .context("commit vanished after insert conflict")?;
                    mark_updated(conn, &id).await?;
                    UpsertOutcome::Updated { identity_token: id }
                }
            }
        };

        upsert_annotation(conn, outcome.identity_token(), annotation).await?;
        if !files.is_empty() {
            replace_files(conn, outcome.identity_token(), files).await?;
        }

        Ok(outcome)
    }
}

/// A pooled connection inside `BEGIN IMMEDIATE`.
///
/// If dropped before [`finish`](Self::finish) completes, for example when the
/// upsert future is cancelled, the connection is detached from the pool and
/// closed. SQLite then discards the open transaction, and no pooled
/// connection is left holding the write lock.
struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTx {
    async fn begin(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let mut tx = Self {
            conn: Some(pool.acquire().await?),
        };
        if let Some(conn) = tx.conn.as_deref_mut() {
            sqlx::query("BEGIN IMMEDIATE").execute(conn).await?;
        }
        Ok(tx)
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .context("transaction connection already released")
    }

    /// Run `COMMIT` or `ROLLBACK` and hand the connection back to the pool.
    async fn finish(mut self, statement: &'static str) -> Result<(), sqlx::Error> {
        if let Some(conn) = self.conn.as_deref_mut() {
            sqlx::query(statement).execute(conn).await?;
        }
        // Released only once the statement has completed.
        self.conn.take();
        Ok(())
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            log::debug!("closing connection with an unfinished transaction");
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl CommitStore for SqliteCommitStore {
    async fn upsert(
        &self,
        record: &CommitRecord,
        annotation: &Annotation,
        files: &[FileChange],
    ) -> Result<UpsertOutcome, StoreError> {
        let key = record.natural_key();
        let err = |e| StoreError::for_key("upsert", &key, e);

        let mut tx = ImmediateTx::begin(&self.pool).await.map_err(err)?;

        let result = match tx.conn() {
            Ok(conn) => self.upsert_in_tx(conn, record, annotation, files).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                tx.finish("COMMIT").await.map_err(err)?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = tx.finish("ROLLBACK").await {
                    log::warn!("rollback failed for {}: {}", key, rb);
                }
                Err(StoreError::for_key("upsert", &key, e))
            }
        }
    }

    async fn list_recent(
        &self,
        limit: i64,
        repository: Option<&str>,
    ) -> Result<Vec<StoredCommit>, StoreError> {
        let limit = limit.clamp(0, MAX_LIST_LIMIT);

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.revision_id, c.message, c.author_name, c.author_email,
                   c.repository, c.branch, c.committed_at, c.created_at,
                   c.analysis_complete, c.lifecycle_state,
                   a.categories_json, a.priority, a.confidence_score, a.sentiment_score,
                   a.sentiment_label, a.insights_json, a.produced_at,
                   (SELECT COUNT(*) FROM commit_files f WHERE f.commit_id = c.id) AS files_changed
            FROM commits c
            LEFT JOIN commit_analyses a ON a.commit_id = c.id
            WHERE (?1 IS NULL OR c.repository = ?1)
            ORDER BY c.created_at DESC, c.rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(repository)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new("list_recent", e))?;

        rows.iter()
            .map(row_to_stored)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| StoreError::new("list_recent", e))
    }

    async fn statistics(&self) -> Result<Statistics, StoreError> {
        let err = |e| StoreError::new("statistics", e);

        let total_commits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits")
            .fetch_one(&self.pool)
            .await
            .map_err(err)?;

        let annotated_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM commits WHERE analysis_complete = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(err)?;

        let distinct_repositories: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT repository FROM commits ORDER BY repository")
                .fetch_all(&self.pool)
                .await
                .map_err(err)?;

        let last_checked: Option<i64> =
            sqlx::query_scalar("SELECT MAX(last_checked_at) FROM checkpoints")
                .fetch_one(&self.pool)
                .await
                .map_err(err)?;

        Ok(Statistics {
            total_commits,
            annotated_count,
            distinct_repositories,
            last_checkpoint_time: last_checked.and_then(DateTime::from_timestamp_millis),
        })
    }

    async fn set_checkpoint(&self, repository: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (repository, last_checked_at) VALUES (?, ?)
            ON CONFLICT(repository) DO UPDATE SET last_checked_at = excluded.last_checked_at
            "#,
        )
        .bind(repository)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::new("set_checkpoint", e))?;

        Ok(())
    }

    async fn checkpoint(&self, repository: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let ms: Option<i64> =
            sqlx::query_scalar("SELECT last_checked_at FROM checkpoints WHERE repository = ?")
                .bind(repository)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::new("checkpoint", e))?;

        Ok(ms.and_then(DateTime::from_timestamp_millis))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::new("ping", e))?;
        Ok(())
    }
}

async fn find_by_natural_key(
    conn: &mut SqliteConnection,
    repository: &str,
    revision_id: &str,
) -> Result<Option<String>> {
    let id = sqlx::query_scalar("SELECT id FROM commits WHERE repository = ? AND revision_id = ?")
        .bind(repository)
        .bind(revision_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

/// Candidate tokens already used as a primary key.
async fn taken_tokens(conn: &mut SqliteConnection, candidates: &[String]) -> Result<HashSet<String>> {
    let placeholders = vec!["?"; candidates.len()].join(", ");
    let sql = format!("SELECT id FROM commits WHERE id IN ({})", placeholders);

    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for token in candidates {
        query = query.bind(token);
    }
    let taken = query.fetch_all(&mut *conn).await?;
    Ok(taken.into_iter().collect())
}

/// Returns `false` when a row for the natural key already exists.
async fn insert_commit(conn: &mut SqliteConnection, record: &CommitRecord, token: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO commits (id, revision_id, message, author_name, author_email, repository,
                             branch, committed_at, created_at, analysis_complete, lifecycle_state)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(repository, revision_id) DO NOTHING
        "#,
    )
    .bind(token)
    .bind(&record.revision_id)
    .bind(&record.message)
    .bind(&record.author_name)
    .bind(&record.author_email)
    .bind(&record.repository)
    .bind(&record.branch)
    .bind(record.committed_at.to_rfc3339())
    .bind(record.created_at.timestamp_millis())
    .bind(record.analysis_complete)
    .bind(LifecycleState::New.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn mark_updated(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("UPDATE commits SET analysis_complete = 1, lifecycle_state = ? WHERE id = ?")
        .bind(LifecycleState::Updated.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn upsert_annotation(
    conn: &mut SqliteConnection,
    commit_id: &str,
    annotation: &Annotation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO commit_analyses (commit_id, categories_json, priority, confidence_score,
                                     sentiment_score, sentiment_label, insights_json, produced_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(commit_id) DO UPDATE SET
            categories_json = excluded.categories_json,
            priority = excluded.priority,
            confidence_score = excluded.confidence_score,
            sentiment_score = excluded.sentiment_score,
            sentiment_label = excluded.sentiment_label,
            insights_json = excluded.insights_json,
            produced_at = excluded.produced_at
        "#,
    )
    .bind(commit_id)
    .bind(serde_json::to_string(&annotation.categories)?)
    .bind(annotation.priority.as_str())
    .bind(annotation.confidence_score)
    .bind(annotation.sentiment_score)
    .bind(annotation.sentiment_label.as_str())
    .bind(serde_json::to_string(&annotation.insights)?)
    .bind(annotation.produced_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn replace_files(conn: &mut SqliteConnection, commit_id: &str, files: &[FileChange]) -> Result<()> {
    sqlx::query("DELETE FROM commit_files WHERE commit_id = ?")
        .bind(commit_id)
        .execute(&mut *conn)
        .await?;

    for (i, file) in files.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO commit_files (commit_id, file_index, file_path, file_name, file_extension,
                                      change_type, additions, deletions, changes, patch)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(commit_id)
        .bind(i as i64)
        .bind(&file.path)
        .bind(file.file_name())
        .bind(file.extension())
        .bind(&file.change_type)
        .bind(file.additions)
        .bind(file.deletions)
        .bind(file.changes)
        .bind(&file.patch)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredCommit> {
    let committed_at: String = row.try_get("committed_at")?;
    let created_at: i64 = row.try_get("created_at")?;
    let lifecycle: String = row.try_get("lifecycle_state")?;

    let record = CommitRecord {
        identity_token: row.try_get("id")?,
        revision_id: row.try_get("revision_id")?,
        message: row.try_get("message")?,
        author_name: row.try_get("author_name")?,
        author_email: row.try_get("author_email")?,
        repository: row.try_get("repository")?,
        branch: row.try_get("branch")?,
        committed_at: DateTime::parse_from_rfc3339(&committed_at)
            .with_context(|| format!("invalid committed_at '{}'", committed_at))?,
        created_at: DateTime::from_timestamp_millis(created_at)
            .with_context(|| format!("invalid created_at {}", created_at))?,
        analysis_complete: row.try_get("analysis_complete")?,
        lifecycle_state: lifecycle.parse().map_err(anyhow::Error::msg)?,
    };

    let priority: Option<String> = row.try_get("priority")?;
    let annotation = match priority {
        Some(priority) => {
            let categories: String = row.try_get("categories_json")?;
            let insights: String = row.try_get("insights_json")?;
            let label: String = row.try_get("sentiment_label")?;
            let produced_at: i64 = row.try_get("produced_at")?;
            Some(Annotation {
                categories: serde_json::from_str(&categories)?,
                priority: priority.parse().map_err(anyhow::Error::msg)?,
                confidence_score: row.try_get("confidence_score")?,
                sentiment_score: row.try_get("sentiment_score")?,
                sentiment_label: label.parse().map_err(anyhow::Error::msg)?,
                insights: serde_json::from_str(&insights)?,
                produced_at: DateTime::from_timestamp_millis(produced_at)
                    .with_context(|| format!("invalid produced_at {}", produced_at))?,
            })
        }
        None => None,
    };

    Ok(StoredCommit {
        record,
        annotation,
        files_changed: row.try_get("files_changed")?,
    })
}
