//! Workflow dispatch and run polling via the GitHub Actions API.
//!
//! The dispatch endpoint does not return the run it creates, so the newest
//! `workflow_dispatch` run id is recorded first and the new run is found by
//! looking for a higher id afterwards. Every discovered id is claimed once,
//! so two cells dispatching the same workflow on the same ref each end up
//! with their own run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rebuild_core::{
    Conclusion, DispatchError, DispatchJob, DispatchResult, RemoteRun, RemoteStatus,
    WorkflowTrigger,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::client::GitHubClient;
use crate::Result;

/// How long to look for the run created by a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            attempts: 12,
            interval: Duration::from_secs(5),
        }
    }
}

/// Subset of a workflow run object.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl WorkflowRun {
    pub fn remote_status(&self) -> RemoteStatus {
        map_status(self.status.as_deref(), self.conclusion.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

/// Map GitHub's `status`/`conclusion` pair onto [`RemoteStatus`].
pub fn map_status(status: Option<&str>, conclusion: Option<&str>) -> RemoteStatus {
    match status {
        Some("completed") => RemoteStatus::Completed(
            conclusion
                .map(Conclusion::parse)
                .unwrap_or_else(|| Conclusion::Other("unknown".to_string())),
        ),
        None | Some("queued" | "requested" | "waiting" | "pending") => RemoteStatus::Queued,
        Some(_) => RemoteStatus::InProgress,
    }
}

/// Oldest run newer than `after` whose id is not in `claimed`.
///
/// Runs are taken oldest first so concurrent dispatches of the same ref pick
/// up their runs in creation order.
pub fn first_unclaimed_run<'a>(
    runs: &'a [WorkflowRun],
    after: Option<u64>,
    claimed: &HashSet<u64>,
) -> Option<&'a WorkflowRun> {
    runs.iter()
        .filter(|r| after.map_or(true, |a| r.id > a))
        .filter(|r| !claimed.contains(&r.id))
        .min_by_key(|r| r.id)
}

/// [`WorkflowTrigger`] backed by the GitHub Actions REST API.
#[derive(Debug, Clone)]
pub struct GitHubWorkflowTrigger {
    client: GitHubClient,
    discovery: DiscoverySettings,
    /// Run ids already handed to a job. Shared between clones.
    claimed: Arc<Mutex<HashSet<u64>>>,
}

impl GitHubWorkflowTrigger {
    pub fn new(client: GitHubClient) -> Self {
        Self {
            client,
            discovery: DiscoverySettings::default(),
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_discovery(mut self, discovery: DiscoverySettings) -> Self {
        self.discovery = discovery;
        self
    }

    fn workflow_path(job: &DispatchJob) -> String {
        format!(
            "/repos/{}/{}/actions/workflows/{}",
            job.target.repo.owner, job.target.repo.name, job.target.workflow
        )
    }

    async fn recent_runs(&self, job: &DispatchJob, per_page: u32) -> Result<Vec<WorkflowRun>> {
        let page: WorkflowRunsPage = self
            .client
            .get_json(
                &format!("{}/runs", Self::workflow_path(job)),
                &[
                    ("event", "workflow_dispatch".to_string()),
                    ("branch", job.branch.to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        Ok(page.workflow_runs)
    }

    async fn dispatch(&self, job: &DispatchJob) -> Result<()> {
        let body = json!({
            "ref": job.branch.as_str(),
            "inputs": job.target.payload_json(),
        });
        self.client
            .post_json(&format!("{}/dispatches", Self::workflow_path(job)), &body)
            .await
    }

    /// Claim the first unclaimed run newer than `after`.
    fn claim(&self, runs: &[WorkflowRun], after: Option<u64>) -> Option<RemoteRun> {
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        let run = first_unclaimed_run(runs, after, &claimed)?;
        claimed.insert(run.id);
        Some(RemoteRun {
            id: run.id,
            url: run.html_url.clone(),
        })
    }

    async fn get_run(&self, job: &DispatchJob, run_id: u64) -> Result<WorkflowRun> {
        self.client
            .get_json(
                &format!(
                    "/repos/{}/{}/actions/runs/{}",
                    job.target.repo.owner, job.target.repo.name, run_id
                ),
                &[],
            )
            .await
    }
}

#[async_trait]
impl WorkflowTrigger for GitHubWorkflowTrigger {
    async fn trigger(&self, job: &DispatchJob) -> DispatchResult<RemoteRun> {
        let trigger_err = |e: crate::GitHubError| DispatchError::Trigger(e.to_string());

        let previous = self
            .recent_runs(job, 1)
            .await
            .map_err(trigger_err)?
            .first()
            .map(|r| r.id);
        debug!(job = %job, previous_run = ?previous, "recorded latest run before dispatch");

        self.dispatch(job).await.map_err(trigger_err)?;
        info!(job = %job, "workflow dispatch accepted");

        for attempt in 1..=self.discovery.attempts.max(1) {
            tokio::time::sleep(self.discovery.interval).await;
            let runs = self.recent_runs(job, 10).await.map_err(trigger_err)?;
            if let Some(run) = self.claim(&runs, previous) {
                debug!(job = %job, run_id = run.id, attempt, "claimed dispatched run");
                return Ok(run);
            }
            debug!(job = %job, attempt, "dispatched run not visible yet");
        }

        Err(DispatchError::RunNotFound { job: job.label() })
    }

    async fn poll(&self, job: &DispatchJob, run: &RemoteRun) -> DispatchResult<RemoteStatus> {
        let current = self
            .get_run(job, run.id)
            .await
            .map_err(|e| DispatchError::Poll(e.to_string()))?;
        Ok(current.remote_status())
    }
}
