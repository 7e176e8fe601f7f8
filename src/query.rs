//! Read-only access to stored commits.
//!
//! [`QuerySurface`] passes straight through to the [`CommitStore`]; it never
//! triggers ingestion and is unaffected by a missing source credential.
//! [`run_commits`] is the `ctrack commits` command.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{Statistics, StoredCommit};
use crate::store::{CommitStore, SqliteCommitStore};

pub const DEFAULT_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct QuerySurface {
    store: Arc<dyn CommitStore>,
}

impl QuerySurface {
    pub fn new(store: Arc<dyn CommitStore>) -> Self {
        Self { store }
    }

    /// Newest commits first. `repository` is an exact match.
    pub async fn get_commits(
        &self,
        limit: i64,
        repository: Option<&str>,
    ) -> Result<Vec<StoredCommit>, StoreError> {
        self.store.list_recent(limit, repository).await
    }

    pub async fn get_statistics(&self) -> Result<Statistics, StoreError> {
        self.store.statistics().await
    }
}

pub async fn run_commits(config: &Config, limit: i64, repository: Option<&str>) -> Result<()> {
    let store = Arc::new(SqliteCommitStore::open(config).await?);
    let query = QuerySurface::new(store.clone());

    let commits = query.get_commits(limit, repository).await?;
    if commits.is_empty() {
        println!("No commits.");
        store.close().await;
        return Ok(());
    }

    for (i, commit) in commits.iter().enumerate() {
        let record = &commit.record;
        let subject = record.message.lines().next().unwrap_or_default();
        let short_rev: String = record.revision_id.chars().take(10).collect();

        println!("{}. {} {} / {}", i + 1, short_rev, record.repository, subject);
        println!(
            "    author: {} <{}>",
            record.author_name, record.author_email
        );
        println!("    committed: {}", record.committed_at.to_rfc3339());
        println!("    state: {}", record.lifecycle_state.as_str());
        if let Some(ref a) = commit.annotation {
            let categories: Vec<&str> = a.categories.iter().map(|c| c.as_str()).collect();
            println!(
                "    analysis: {} priority, {} ({:.3}), confidence {:.3}",
                a.priority.as_str(),
                a.sentiment_label.as_str(),
                a.sentiment_score,
                a.confidence_score
            );
            if !categories.is_empty() {
                println!("    categories: {}", categories.join(", "));
            }
        }
        if commit.files_changed > 0 {
            println!("    files: {}", commit.files_changed);
        }
        println!("    id: {}", record.identity_token);
        println!();
    }

    store.close().await;
    Ok(())
}
