//! Ingestion cycle orchestration.
//!
//! One cycle moves through these phases:
//!
//! ```text
//! Idle → Fetching → (per commit: Assigning → Analyzing → Persisting) → Checkpointing → Idle
//! ```
//!
//! A fetch error or an empty fetch ends the cycle without touching the
//! checkpoint. Once at least one commit has been fetched, every commit is
//! attempted independently and the checkpoint advances even if all of them
//! fail to persist.
//!
//! [`Pipeline::run_cycle`] holds an async try-lock for the duration of the
//! cycle, so a second call made while one is running returns immediately with
//! a [`CycleReport`] marked `skipped`.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::analyzer::{analyze_or_neutral, Analyzer};
use crate::config::Config;
use crate::error::FetchError;
use crate::identity::IdentityAssigner;
use crate::models::{CommitRecord, NaturalKey, RawCommit, UpsertOutcome};
use crate::source::CommitSource;
use crate::store::CommitStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Assigning,
    Analyzing,
    Persisting,
    Checkpointing,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Assigning => "assigning",
            CyclePhase::Analyzing => "analyzing",
            CyclePhase::Persisting => "persisting",
            CyclePhase::Checkpointing => "checkpointing",
        };
        f.write_str(name)
    }
}

/// Outcome counters of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    /// Another cycle was already running; nothing was done.
    pub skipped: bool,
    /// Set when this cycle advanced the checkpoint.
    pub checkpoint: Option<DateTime<Utc>>,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Per-repository knobs of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub repository: String,
    pub branch: String,
    pub page_size: usize,
    pub detail_limit: usize,
    pub fetch_timeout: Duration,
    pub offset: FixedOffset,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            repository: config.source.repository.clone(),
            branch: config.source.branch.clone(),
            page_size: config.source.page_size,
            detail_limit: config.source.detail_limit,
            fetch_timeout: Duration::from_secs(config.source.timeout_secs),
            offset: config
                .ingest
                .offset()
                .context("invalid ingest.commit_utc_offset")?,
        })
    }
}

pub struct Pipeline {
    source: Arc<dyn CommitSource>,
    store: Arc<dyn CommitStore>,
    analyzer: Arc<dyn Analyzer>,
    assigner: IdentityAssigner,
    settings: PipelineSettings,
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn CommitSource>,
        store: Arc<dyn CommitStore>,
        analyzer: Arc<dyn Analyzer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            analyzer,
            assigner: IdentityAssigner::new(),
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Whether a cycle currently holds the overlap guard.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run one ingestion cycle, or skip if one is already in flight.
    pub async fn run_cycle(&self) -> CycleReport {
        let Ok(_guard) = self.running.try_lock() else {
            log::info!(
                "ingestion of {} already running, skipping trigger",
                self.settings.repository
            );
            return CycleReport::skipped();
        };

        let report = self.cycle().await;
        self.phase(CyclePhase::Idle, None);

        log::info!(
            "ingestion of {} from {}: fetched {}, inserted {}, updated {}, failed {}{}",
            self.settings.repository,
            self.source.name(),
            report.fetched,
            report.inserted,
            report.updated,
            report.failed,
            match report.checkpoint {
                Some(at) => format!(", checkpoint {}", at.to_rfc3339()),
                None => String::new(),
            }
        );
        report
    }

    async fn cycle(&self) -> CycleReport {
        let repository = &self.settings.repository;
        let mut report = CycleReport::default();

        self.phase(CyclePhase::Fetching, None);
        let mut commits = match self.fetch(self.source.list_commits(repository)).await {
            Ok(commits) => commits,
            Err(e) => {
                log::warn!(
                    "fetch from {} failed for {}: {}",
                    self.source.name(),
                    repository,
                    e
                );
                return report;
            }
        };
        commits.truncate(self.settings.page_size);

        if commits.is_empty() {
            log::info!("no commits returned for {}", repository);
            return report;
        }
        report.fetched = commits.len();

        self.enrich(&mut commits).await;

        for raw in &commits {
            let key = NaturalKey::new(repository.as_str(), raw.revision_id.as_str());
            match self.process(raw, &key).await {
                Ok(UpsertOutcome::Inserted { .. }) => report.inserted += 1,
                Ok(UpsertOutcome::Updated { .. }) => report.updated += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("commit {} not ingested: {:#}", key, e);
                }
            }
        }

        self.phase(CyclePhase::Checkpointing, None);
        let now = Utc::now();
        match self.store.set_checkpoint(repository, now).await {
            Ok(()) => report.checkpoint = Some(now),
            Err(e) => log::warn!("checkpoint for {} not saved: {}", repository, e),
        }

        report
    }

    /// Replace the first `detail_limit` list entries with their detail
    /// (which carries the file list). Failures keep the list entry.
    async fn enrich(&self, commits: &mut [RawCommit]) {
        let repository = &self.settings.repository;
        let limit = self.settings.detail_limit.min(commits.len());

        for commit in commits.iter_mut().take(limit) {
            let detail = self
                .fetch(self.source.get_commit_detail(repository, &commit.revision_id))
                .await;
            match detail {
                Ok(detail) => *commit = detail,
                Err(e) => log::warn!(
                    "detail for {}@{} unavailable, using list entry: {}",
                    repository,
                    commit.revision_id,
                    e
                ),
            }
        }
    }

    async fn process(&self, raw: &RawCommit, key: &NaturalKey) -> Result<UpsertOutcome> {
        self.phase(CyclePhase::Assigning, Some(key));
        // Rejects an empty revision before analysis; the stored token comes
        // back in the outcome.
        let token = self.assigner.assign(&key.repository, &raw.revision_id)?;
        let record = CommitRecord::from_raw(
            raw,
            &self.settings.repository,
            &self.settings.branch,
            token,
            self.settings.offset,
        );

        self.phase(CyclePhase::Analyzing, Some(key));
        let annotation = analyze_or_neutral(self.analyzer.as_ref(), &raw.message);

        self.phase(CyclePhase::Persisting, Some(key));
        let outcome = self.store.upsert(&record, &annotation, &raw.files).await?;
        Ok(outcome)
    }

    async fn fetch<T>(
        &self,
        request: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        match tokio::time::timeout(self.settings.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.settings.fetch_timeout.as_secs())),
        }
    }

    fn phase(&self, phase: CyclePhase, key: Option<&NaturalKey>) {
        match key {
            Some(key) => log::debug!("cycle phase {} for {}", phase, key),
            None => log::debug!("cycle phase {} ({})", phase, self.settings.repository),
        }
    }
}
