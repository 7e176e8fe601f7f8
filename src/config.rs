use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Remote commit source (GitHub REST API).
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `owner/name` of the tracked repository.
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// How many of the fetched commits get a detail (file list) request.
    #[serde(default = "default_detail_limit")]
    pub detail_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_page_size() -> usize {
    30
}
fn default_detail_limit() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Offset every `committed_at` is normalized to, as `+HH:MM` / `-HH:MM`.
    #[serde(default = "default_commit_utc_offset")]
    pub commit_utc_offset: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            commit_utc_offset: default_commit_utc_offset(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}
fn default_commit_utc_offset() -> String {
    "+00:00".to_string()
}

impl IngestConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.commit_utc_offset)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_max_commits")]
    pub max_commits: i64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_commits: default_export_max_commits(),
        }
    }
}

fn default_export_max_commits() -> i64 {
    100
}

/// Parse `+05:30`, `-08:00`, `Z` or `UTC` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        (1, "00:00")
    } else if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        anyhow::bail!("invalid UTC offset '{}': expected +HH:MM or -HH:MM", raw);
    };

    let (hours, minutes) = rest
        .split_once(':')
        .with_context(|| format!("invalid UTC offset '{}': expected +HH:MM or -HH:MM", raw))?;
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("invalid hours in UTC offset '{}'", raw))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid minutes in UTC offset '{}'", raw))?;

    if hours > 23 || minutes > 59 {
        anyhow::bail!("UTC offset '{}' is out of range", raw);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("UTC offset '{}' is out of range", raw))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate source
    let repo = config.source.repository.trim();
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
        _ => anyhow::bail!(
            "source.repository must be of the form 'owner/name', got '{}'",
            config.source.repository
        ),
    }
    if config.source.page_size == 0 || config.source.page_size > 100 {
        anyhow::bail!("source.page_size must be in 1..=100");
    }
    if config.source.timeout_secs == 0 {
        anyhow::bail!("source.timeout_secs must be > 0");
    }

    // Validate ingest
    if config.ingest.interval_secs == 0 {
        anyhow::bail!("ingest.interval_secs must be > 0");
    }
    config.ingest.offset()?;

    // Validate export
    if config.export.max_commits < 1 {
        anyhow::bail!("export.max_commits must be >= 1");
    }

    Ok(())
}
