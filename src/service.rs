//! Service layer around the pipeline.
//!
//! [`IngestionService`] is what the binary and the HTTP server hold. It owns
//! the store and, when the source is configured, the [`Pipeline`]. A missing
//! credential does not prevent construction: queries keep working and the
//! [`ConfigurationError`] is returned by [`trigger_ingestion_now`] instead.
//!
//! [`trigger_ingestion_now`]: IngestionService::trigger_ingestion_now

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::analyzer::HeuristicAnalyzer;
use crate::config::Config;
use crate::error::{ConfigurationError, StoreError};
use crate::models::{Statistics, StoredCommit};
use crate::pipeline::{CycleReport, Pipeline, PipelineSettings};
use crate::query::QuerySurface;
use crate::source::GitHubSource;
use crate::store::{CommitStore, SqliteCommitStore};

/// Returned by [`IngestionService::trigger_ingestion_now`] before the cycle
/// has done any work.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerAck {
    pub repository: String,
    pub requested_at: DateTime<Utc>,
    /// A cycle was in flight when the trigger arrived; this trigger will be
    /// coalesced into it.
    pub already_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub store_ok: bool,
    pub source_configured: bool,
    pub ingestion_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Clone)]
pub struct IngestionService {
    pipeline: Result<Arc<Pipeline>, ConfigurationError>,
    query: QuerySurface,
    store: Arc<dyn CommitStore>,
}

impl IngestionService {
    pub fn new(
        pipeline: Result<Arc<Pipeline>, ConfigurationError>,
        store: Arc<dyn CommitStore>,
    ) -> Self {
        Self {
            pipeline,
            query: QuerySurface::new(store.clone()),
            store,
        }
    }

    /// Open the store and build the GitHub-backed pipeline from `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn CommitStore> = Arc::new(SqliteCommitStore::open(config).await?);
        let settings = PipelineSettings::from_config(config)?;

        let pipeline = GitHubSource::from_config(&config.source).map(|source| {
            Arc::new(Pipeline::new(
                Arc::new(source),
                store.clone(),
                Arc::new(HeuristicAnalyzer::new()),
                settings,
            ))
        });
        if let Err(ref e) = pipeline {
            log::warn!("ingestion disabled: {}", e);
        }

        Ok(Self::new(pipeline, store))
    }

    pub fn pipeline(&self) -> Result<&Arc<Pipeline>, ConfigurationError> {
        self.pipeline.as_ref().map_err(Clone::clone)
    }

    /// Start a cycle in the background and return at once.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger_ingestion_now(&self) -> Result<TriggerAck, ConfigurationError> {
        let pipeline = self.pipeline()?.clone();
        let ack = TriggerAck {
            repository: pipeline.settings().repository.clone(),
            requested_at: Utc::now(),
            already_running: pipeline.is_running(),
        };

        tokio::spawn(async move {
            pipeline.run_cycle().await;
        });

        Ok(ack)
    }

    /// Run a cycle in the foreground. Used by `ctrack ingest`.
    pub async fn run_once(&self) -> Result<CycleReport, ConfigurationError> {
        let pipeline = self.pipeline()?;
        Ok(pipeline.run_cycle().await)
    }

    /// Liveness of the local process and store. Never contacts the source.
    pub async fn run_health_probe(&self) -> HealthReport {
        let store = self.store.ping().await;
        let (source_configured, ingestion_running) = match &self.pipeline {
            Ok(p) => (true, p.is_running()),
            Err(_) => (false, false),
        };

        HealthReport {
            status: if store.is_ok() { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            store_ok: store.is_ok(),
            source_configured,
            ingestion_running,
            detail: store.err().map(|e| e.to_string()),
        }
    }

    /// Run a cycle every `interval`, starting immediately. Returns `None`
    /// when the source is not configured.
    pub fn spawn_scheduler(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let pipeline = self.pipeline.as_ref().ok()?.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                pipeline.run_cycle().await;
            }
        }))
    }

    pub async fn get_commits(
        &self,
        limit: i64,
        repository: Option<&str>,
    ) -> Result<Vec<StoredCommit>, StoreError> {
        self.query.get_commits(limit, repository).await
    }

    pub async fn get_statistics(&self) -> Result<Statistics, StoreError> {
        self.query.get_statistics().await
    }
}

/// `ctrack ingest`: one foreground cycle with a printed report.
pub async fn run_ingest(config: &Config) -> Result<()> {
    let service = IngestionService::from_config(config).await?;
    let report = service.run_once().await?;

    println!("ingest {}", config.source.repository);
    println!("  fetched:  {}", report.fetched);
    println!("  inserted: {}", report.inserted);
    println!("  updated:  {}", report.updated);
    println!("  failed:   {}", report.failed);
    match report.checkpoint {
        Some(at) => println!("  checkpoint: {}", at.to_rfc3339()),
        None => println!("  checkpoint: unchanged"),
    }
    println!("ok");
    Ok(())
}
