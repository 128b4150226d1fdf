//! Matrix fan-out: repository × branch.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::branch::{BranchName, BranchSet};
use crate::target::RepoTarget;

/// One (repository, branch) cell submitted to the remote trigger.
///
/// Lives only for the duration of its trigger call and wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchJob {
    pub id: Uuid,
    pub target: RepoTarget,
    pub branch: BranchName,
}

impl DispatchJob {
    pub fn new(target: RepoTarget, branch: BranchName) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            branch,
        }
    }

    /// `owner/repo@branch`, used in logs and reports.
    pub fn label(&self) -> String {
        format!("{}@{}", self.target.repo, self.branch)
    }
}

impl fmt::Display for DispatchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.target.repo, self.branch)
    }
}

/// Two-axis build matrix.
#[derive(Debug, Clone)]
pub struct BuildMatrix {
    pub repos: Vec<RepoTarget>,
    pub branches: BranchSet,
}

impl BuildMatrix {
    pub fn new(repos: Vec<RepoTarget>, branches: BranchSet) -> Self {
        Self { repos, branches }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.repos.len() * self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only repos whose name is listed. An empty filter keeps everything.
    pub fn restrict_repos<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        if !names.is_empty() {
            self.repos
                .retain(|t| names.iter().any(|n| n.as_ref() == t.repo.name));
        }
        self
    }

    /// Expand the cross product, repo-major.
    pub fn jobs(&self) -> Vec<DispatchJob> {
        self.repos
            .iter()
            .flat_map(|target| {
                self.branches
                    .iter()
                    .map(move |branch| DispatchJob::new(target.clone(), branch.clone()))
            })
            .collect()
    }

    /// `{"repo": [...], "branch": [...]}` as consumed by a job matrix.
    pub fn axes_json(&self) -> serde_json::Value {
        serde_json::json!({
            "repo": self.repos.iter().map(|t| t.repo.name.as_str()).collect::<Vec<_>>(),
            "branch": self.branches.as_slice(),
        })
    }
}
