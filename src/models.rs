//! Core data models used throughout Commit Tracker.
//!
//! These types represent the raw commits produced by a source, the canonical
//! records and annotations owned by the store, and the read-side shapes
//! returned by the query surface.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Externally meaningful key of a commit: repository plus source revision id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NaturalKey {
    pub repository: String,
    pub revision_id: String,
}

impl NaturalKey {
    pub fn new(repository: impl Into<String>, revision_id: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            revision_id: revision_id.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.revision_id)
    }
}

/// A commit as returned by a [`CommitSource`](crate::source::CommitSource),
/// before identity assignment and analysis.
#[derive(Debug, Clone)]
pub struct RawCommit {
    pub revision_id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub committed_at: DateTime<FixedOffset>,
    /// Only populated by detail fetches.
    pub files: Vec<FileChange>,
}

/// One file touched by a commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: String,
    pub additions: i64,
    pub deletions: i64,
    pub changes: i64,
    pub patch: Option<String>,
}

impl FileChange {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(pos) => Some(&name[pos + 1..]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    New,
    Updated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::New => "new",
            LifecycleState::Updated => "updated",
        }
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LifecycleState::New),
            "updated" => Ok(LifecycleState::Updated),
            other => Err(format!("unknown lifecycle state: {}", other)),
        }
    }
}

/// Canonical stored representation of one observed revision.
#[derive(Debug, Clone, Serialize)]
pub struct CommitRecord {
    /// Provisional until stored. The store resolves the authoritative token
    /// (existing row, or first free candidate) and reports it in
    /// [`UpsertOutcome`].
    pub identity_token: String,
    pub revision_id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub repository: String,
    pub branch: String,
    pub committed_at: DateTime<FixedOffset>,
    pub created_at: DateTime<Utc>,
    pub analysis_complete: bool,
    pub lifecycle_state: LifecycleState,
}

impl CommitRecord {
    /// Build a fresh record from a raw commit. `committed_at` is converted to
    /// `offset` so every stored timestamp shares one reference offset.
    pub fn from_raw(
        raw: &RawCommit,
        repository: &str,
        branch: &str,
        identity_token: String,
        offset: FixedOffset,
    ) -> Self {
        Self {
            identity_token,
            revision_id: raw.revision_id.clone(),
            message: raw.message.clone(),
            author_name: raw.author_name.clone(),
            author_email: raw.author_email.clone(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            committed_at: raw.committed_at.with_timezone(&offset),
            created_at: Utc::now(),
            analysis_complete: true,
            lifecycle_state: LifecycleState::New,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.repository, &self.revision_id)
    }
}

/// Fixed category vocabulary, in detection-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BugFix,
    Feature,
    Documentation,
    Refactor,
    Security,
    Performance,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BugFix => "bug_fix",
            Category::Feature => "feature",
            Category::Documentation => "documentation",
            Category::Refactor => "refactor",
            Category::Security => "security",
            Category::Performance => "performance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Priority::Normal),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.3 {
            SentimentLabel::Positive
        } else if score < -0.3 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            other => Err(format!("unknown sentiment label: {}", other)),
        }
    }
}

/// Heuristic enrichment attached to exactly one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub categories: Vec<Category>,
    pub priority: Priority,
    pub confidence_score: f64,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub insights: Vec<String>,
    pub produced_at: DateTime<Utc>,
}

pub const ANALYSIS_FAILED_INSIGHT: &str = "Analysis failed";

impl Annotation {
    /// Neutral, zero-confidence annotation used when analysis faults.
    pub fn failed() -> Self {
        Self {
            categories: Vec::new(),
            priority: Priority::Normal,
            confidence_score: 0.0,
            sentiment_score: 0.0,
            sentiment_label: SentimentLabel::Neutral,
            insights: vec![ANALYSIS_FAILED_INSIGHT.to_string()],
            produced_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.insights.iter().any(|i| i == ANALYSIS_FAILED_INSIGHT)
    }
}

/// Result of [`CommitStore::upsert`](crate::store::CommitStore::upsert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted { identity_token: String },
    Updated { identity_token: String },
}

impl UpsertOutcome {
    pub fn identity_token(&self) -> &str {
        match self {
            UpsertOutcome::Inserted { identity_token } | UpsertOutcome::Updated { identity_token } => {
                identity_token
            }
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted { .. })
    }
}

/// A stored commit with its current annotation, as served to readers.
#[derive(Debug, Clone, Serialize)]
pub struct StoredCommit {
    #[serde(flatten)]
    pub record: CommitRecord,
    pub annotation: Option<Annotation>,
    pub files_changed: i64,
}

/// Aggregate counters over the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_commits: i64,
    pub annotated_count: i64,
    pub distinct_repositories: Vec<String>,
    pub last_checkpoint_time: Option<DateTime<Utc>>,
}
