//! Branch listing with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, RebuildError, Result};
use crate::target::RepoRef;

/// A single attempt at fetching every branch name of a repository.
///
/// Implement this for the hosting API, or use [`crate::fakes`] in tests.
#[async_trait]
pub trait BranchSource: Send + Sync {
    async fn fetch_branch_names(&self, repo: &RepoRef) -> std::result::Result<Vec<String>, FetchError>;
}

/// How many times a listing is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Lists branches, retrying any failed attempt.
pub struct BranchLister {
    source: Arc<dyn BranchSource>,
    policy: RetryPolicy,
}

impl BranchLister {
    pub fn new(source: Arc<dyn BranchSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Return all branch names of `repo`.
    ///
    /// No partial result is ever produced: either one attempt succeeds or
    /// [`RebuildError::ListingFailed`] carries the last attempt's error.
    pub async fn list(&self, repo: &RepoRef) -> Result<Vec<String>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.source.fetch_branch_names(repo).await {
                Ok(names) => {
                    debug!(repo = %repo, attempt, count = names.len(), "listed branches");
                    return Ok(names);
                }
                Err(err) if attempt < max_attempts => {
                    warn!(repo = %repo, attempt, max_attempts, error = %err, "branch listing failed, retrying");
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(repo = %repo, attempt, error = %err, "branch listing failed, giving up");
                    return Err(RebuildError::ListingFailed {
                        repo: repo.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}
