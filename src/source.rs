//! Remote commit sources.
//!
//! A [`CommitSource`] is the only collaborator that crosses a process
//! boundary. Its failures are [`FetchError`]s, which the pipeline keeps
//! distinct from an empty result: an error never advances the checkpoint.
//!
//! [`GitHubSource`] talks to the GitHub REST API:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | [`list_commits`](CommitSource::list_commits) | `GET /repos/{repo}/commits?sha={branch}&per_page={n}` |
//! | [`get_commit_detail`](CommitSource::get_commit_detail) | `GET /repos/{repo}/commits/{sha}` |
//!
//! # Environment Variables
//!
//! The API token is read from the variable named by `source.token_env`
//! (default `GITHUB_TOKEN`). A missing token is a [`ConfigurationError`],
//! raised when the source is built rather than on every request.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::{ConfigurationError, FetchError};
use crate::models::{FileChange, RawCommit};

/// A provider of commit metadata for a repository.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Short label used in logs (e.g. `"github"`).
    fn name(&self) -> &str;

    /// Most recent commits of `repository`, newest first, bounded by the
    /// source's page size. File lists are not populated.
    async fn list_commits(&self, repository: &str) -> Result<Vec<RawCommit>, FetchError>;

    /// One commit including its file change list.
    async fn get_commit_detail(
        &self,
        repository: &str,
        revision_id: &str,
    ) -> Result<RawCommit, FetchError>;
}

/// [`CommitSource`] backed by the GitHub REST API.
pub struct GitHubSource {
    client: reqwest::Client,
    api_url: String,
    token: String,
    branch: String,
    page_size: usize,
    timeout_secs: u64,
}

impl GitHubSource {
    /// Build a source from configuration, reading the token from the
    /// environment.
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigurationError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigurationError::MissingCredential(config.token_env.clone()))?;
        Self::with_token(config, token)
    }

    /// Build a source with an explicit token.
    pub fn with_token(config: &SourceConfig, token: String) -> Result<Self, ConfigurationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("commit-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigurationError::InvalidSource(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            branch: config.branch.clone(),
            page_size: config.page_size,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else {
            FetchError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl CommitSource for GitHubSource {
    fn name(&self) -> &str {
        "github"
    }

    async fn list_commits(&self, repository: &str) -> Result<Vec<RawCommit>, FetchError> {
        let url = format!("{}/repos/{}/commits", self.api_url, repository);
        let query = [
            ("sha", self.branch.clone()),
            ("per_page", self.page_size.to_string()),
        ];
        let payload: Vec<GhCommit> = self.get_json(&url, &query).await?;

        // A malformed entry is dropped here so it cannot sink the whole page.
        Ok(payload
            .into_iter()
            .take(self.page_size)
            .filter_map(|c| match c.into_raw() {
                Ok(raw) => Some(raw),
                Err(e) => {
                    log::warn!("skipping commit from {}: {}", repository, e);
                    None
                }
            })
            .collect())
    }

    async fn get_commit_detail(
        &self,
        repository: &str,
        revision_id: &str,
    ) -> Result<RawCommit, FetchError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_url, repository, revision_id);
        let payload: GhCommit = self.get_json(&url, &[]).await?;
        payload.into_raw()
    }
}

// ============ GitHub payloads ============

#[derive(Debug, Deserialize)]
struct GhCommit {
    sha: String,
    commit: GhCommitBody,
    #[serde(default)]
    files: Vec<GhFile>,
}

#[derive(Debug, Deserialize)]
struct GhCommitBody {
    message: String,
    author: Option<GhSignature>,
    committer: Option<GhSignature>,
}

#[derive(Debug, Deserialize)]
struct GhSignature {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhFile {
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
    #[serde(default)]
    changes: i64,
    patch: Option<String>,
}

impl GhCommit {
    fn into_raw(self) -> Result<RawCommit, FetchError> {
        let signature = self
            .commit
            .author
            .or(self.commit.committer)
            .ok_or_else(|| FetchError::Decode(format!("commit {} has no author", self.sha)))?;

        let date = signature
            .date
            .as_deref()
            .ok_or_else(|| FetchError::Decode(format!("commit {} has no date", self.sha)))?;
        let committed_at: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(date)
            .map_err(|e| FetchError::Decode(format!("commit {} date '{}': {}", self.sha, date, e)))?;

        Ok(RawCommit {
            revision_id: self.sha,
            message: self.commit.message,
            author_name: signature.name,
            author_email: signature.email,
            committed_at,
            files: self
                .files
                .into_iter()
                .map(|f| FileChange {
                    path: f.filename,
                    change_type: f.status,
                    additions: f.additions,
                    deletions: f.deletions,
                    changes: f.changes,
                    patch: f.patch,
                })
                .collect(),
        })
    }
}
