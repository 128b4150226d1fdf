//! Branch listing via `GET /repos/{owner}/{repo}/branches`.

use async_trait::async_trait;
use rebuild_core::{BranchSource, FetchError, RepoRef};
use serde::Deserialize;
use tracing::debug;

use crate::client::GitHubClient;
use crate::Result;

/// Largest page size GitHub accepts.
pub const PAGE_SIZE: usize = 100;

/// Stop after this many pages rather than loop forever on a misbehaving API.
const MAX_PAGES: u32 = 50;

#[derive(Debug, Deserialize)]
struct BranchRecord {
    name: String,
}

/// [`BranchSource`] backed by the GitHub branches endpoint.
#[derive(Debug, Clone)]
pub struct GitHubBranchSource {
    client: GitHubClient,
}

impl GitHubBranchSource {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    /// Fetch every page; a single failed page fails the whole listing.
    pub async fn list_all(&self, repo: &RepoRef) -> Result<Vec<String>> {
        let path = format!("/repos/{}/{}/branches", repo.owner, repo.name);
        let mut names = Vec::new();
        for page in 1..=MAX_PAGES {
            let records: Vec<BranchRecord> = self
                .client
                .get_json(
                    &path,
                    &[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())],
                )
                .await?;
            let count = records.len();
            names.extend(records.into_iter().map(|r| r.name));
            debug!(repo = %repo, page, count, "fetched branch page");
            if count < PAGE_SIZE {
                break;
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl BranchSource for GitHubBranchSource {
    async fn fetch_branch_names(&self, repo: &RepoRef) -> std::result::Result<Vec<String>, FetchError> {
        self.list_all(repo).await.map_err(FetchError::from)
    }
}
