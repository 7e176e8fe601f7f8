//! Identity assignment for commits.
//!
//! The identity token is derived from the natural key
//! `(repository, revision_id)`, so presenting the same commit twice yields
//! the same token without any coordination. The store still resolves records
//! by natural key first and only consults the assigner when it needs a token
//! for a brand-new record.
//!
//! If a candidate token is already owned by a *different* natural key (a hash
//! collision, or a token written by an older salted scheme), the assigner
//! walks a bounded list of probe tokens and finally falls back to a token
//! salted with the current time and a random UUID.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::AssignerError;

/// Number of alternative tokens tried after the primary one.
pub const MAX_PROBES: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct IdentityAssigner;

impl IdentityAssigner {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic token for `(repository, revision_id)`.
    pub fn assign(&self, repository: &str, revision_id: &str) -> Result<String, AssignerError> {
        let revision_id = validate(repository, revision_id)?;
        Ok(digest(&[repository, revision_id]))
    }

    /// The primary token followed by [`MAX_PROBES`] probe tokens, in the
    /// order they should be tried.
    pub fn candidates(
        &self,
        repository: &str,
        revision_id: &str,
    ) -> Result<Vec<String>, AssignerError> {
        let revision_id = validate(repository, revision_id)?;
        let mut tokens = Vec::with_capacity(MAX_PROBES + 1);
        tokens.push(digest(&[repository, revision_id]));
        for probe in 1..=MAX_PROBES {
            tokens.push(digest(&[repository, revision_id, &format!("probe-{}", probe)]));
        }
        Ok(tokens)
    }

    /// Pick the first candidate not in `taken`. When every candidate is
    /// taken, returns a time-and-random salted token; that path is not
    /// collision-checked again.
    pub fn choose(
        &self,
        repository: &str,
        revision_id: &str,
        taken: &HashSet<String>,
    ) -> Result<String, AssignerError> {
        let candidates = self.candidates(repository, revision_id)?;
        if let Some(token) = candidates.into_iter().find(|t| !taken.contains(t)) {
            return Ok(token);
        }

        log::warn!(
            "identity collision: all {} candidate tokens taken for {}@{}, using salted token",
            MAX_PROBES + 1,
            repository,
            revision_id
        );
        Ok(self.salted(repository, revision_id))
    }

    fn salted(&self, repository: &str, revision_id: &str) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string();
        let nonce = Uuid::new_v4().to_string();
        digest(&[repository, revision_id, &now, &nonce])
    }
}

fn validate<'a>(repository: &str, revision_id: &'a str) -> Result<&'a str, AssignerError> {
    if revision_id.trim().is_empty() {
        return Err(AssignerError::EmptyRevision {
            repository: repository.to_string(),
        });
    }
    Ok(revision_id)
}

/// SHA-256 over length-prefixed parts, so `("ab", "c")` and `("a", "bc")`
/// hash differently.
fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
