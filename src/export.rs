//! Export recent commits as a JSON snapshot.
//!
//! The snapshot holds the newest `export.max_commits` commits with their
//! annotations, for dashboards that read a static file instead of the HTTP
//! API:
//!
//! ```json
//! { "commits": [ ... ], "last_updated": "2025-08-15T11:29:38Z", "total_commits": 42 }
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::models::StoredCommit;
use crate::query::QuerySurface;
use crate::store::SqliteCommitStore;

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub commits: Vec<StoredCommit>,
    pub last_updated: DateTime<Utc>,
    /// Count of all stored commits, not just the exported ones.
    pub total_commits: i64,
}

pub async fn build_snapshot(query: &QuerySurface, max_commits: i64) -> Result<Snapshot> {
    let commits = query.get_commits(max_commits, None).await?;
    let stats = query.get_statistics().await?;

    Ok(Snapshot {
        commits,
        last_updated: Utc::now(),
        total_commits: stats.total_commits,
    })
}

/// If `output` is `Some`, writes to that file path. Otherwise writes to
/// stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let store = Arc::new(SqliteCommitStore::open(config).await?);
    let query = QuerySurface::new(store.clone());

    let snapshot = build_snapshot(&query, config.export.max_commits).await?;
    let json = serde_json::to_string_pretty(&snapshot)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} of {} commits to {}",
                snapshot.commits.len(),
                snapshot.total_commits,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    store.close().await;
    Ok(())
}
