//! Rebuild GitHub: REST adapter for the rebuild core
//!
//! Implements [`rebuild_core::BranchSource`] over the branches endpoint and
//! [`rebuild_core::WorkflowTrigger`] over the Actions workflow-dispatch and
//! workflow-run endpoints.

pub mod branches;
pub mod client;
pub mod error;
pub mod workflows;

pub use branches::GitHubBranchSource;
pub use client::{GitHubClient, GitHubConfig, DEFAULT_API_URL, DEFAULT_TIMEOUT};
pub use error::GitHubError;
pub use workflows::{map_status, DiscoverySettings, GitHubWorkflowTrigger, WorkflowRun};

/// Result alias for GitHub adapter operations
pub type Result<T> = std::result::Result<T, GitHubError>;
