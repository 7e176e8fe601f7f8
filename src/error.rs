//! Error taxonomy of the ingestion pipeline.
//!
//! Component boundaries return these typed errors; the binary and CLI
//! commands wrap them in `anyhow` like every other fallible call.

use crate::models::NaturalKey;

/// The remote source could not be queried. Recoverable on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("commit source unreachable: {0}")]
    Unreachable(String),

    #[error("commit source rejected request to {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("commit source timed out after {0}s")]
    Timeout(u64),

    #[error("could not decode commit source response: {0}")]
    Decode(String),
}

/// Identity assignment rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignerError {
    #[error("revision id must not be empty (repository '{repository}')")]
    EmptyRevision { repository: String },
}

/// A storage read or write failed. Carries the natural key of the commit
/// being written, when there is one.
#[derive(Debug, thiserror::Error)]
#[error("store {operation} failed{}: {source}", describe_key(.key))]
pub struct StoreError {
    pub operation: &'static str,
    pub key: Option<NaturalKey>,
    #[source]
    pub source: BoxError,
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn describe_key(key: &Option<NaturalKey>) -> String {
    match key {
        Some(k) => format!(" for {}", k),
        None => String::new(),
    }
}

impl StoreError {
    pub fn new(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            key: None,
            source: source.into(),
        }
    }

    pub fn for_key(
        operation: &'static str,
        key: &NaturalKey,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            operation,
            key: Some(key.clone()),
            source: source.into(),
        }
    }
}

/// Required configuration for the external source is missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("invalid source configuration: {0}")]
    InvalidSource(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mentions_key() {
        let key = NaturalKey::new("acme/widgets", "deadbeef");
        let err = StoreError::for_key("upsert", &key, anyhow::anyhow!("disk full"));
        let msg = err.to_string();
        assert!(msg.contains("acme/widgets@deadbeef"), "{}", msg);
        assert!(msg.contains("disk full"), "{}", msg);

        let err = StoreError::new("statistics", anyhow::anyhow!("locked"));
        assert_eq!(err.to_string(), "store statistics failed: locked");
    }
}
