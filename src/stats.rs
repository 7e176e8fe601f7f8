//! Store statistics overview.
//!
//! Prints what has been ingested so far: commit counts, annotation coverage,
//! repositories and when each was last checked. Used by `ctrack stats`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::query::QuerySurface;
use crate::store::{CommitStore, SqliteCommitStore};

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = Arc::new(SqliteCommitStore::open(config).await?);
    let query = QuerySurface::new(store.clone());
    let stats = query.get_statistics().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Commit Tracker Store Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Commits:     {}", stats.total_commits);
    println!(
        "  Annotated:   {} / {} ({}%)",
        stats.annotated_count,
        stats.total_commits,
        if stats.total_commits > 0 {
            (stats.annotated_count * 100) / stats.total_commits
        } else {
            0
        }
    );
    println!(
        "  Last check:  {}",
        stats
            .last_checkpoint_time
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.distinct_repositories.is_empty() {
        println!();
        println!("  By repository:");
        println!("  {:<40} {}", "REPOSITORY", "LAST CHECK");
        println!("  {}", "-".repeat(60));

        for repository in &stats.distinct_repositories {
            let checked = match store.checkpoint(repository).await? {
                Some(at) => format_relative(at),
                None => "never".to_string(),
            };
            println!("  {:<40} {}", repository, checked);
        }
    }

    println!();

    store.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time such as "3 hours ago"; older or future times print as a date.
pub fn format_relative(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();

    if delta < 0 {
        return format_iso(at);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_iso(at)
    }
}

fn format_iso(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}
