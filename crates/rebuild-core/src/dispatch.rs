//! Remote workflow dispatch and completion polling.
//!
//! Each [`DispatchJob`] moves through
//! `Pending -> Triggered -> Polling -> {Succeeded | Failed | TimedOut}`.
//! A trigger call that outlives its budget ends in `TimedOut` straight from
//! `Pending`. A locally cancelled wait ends in `Cancelled`; the remote run is
//! left alone.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DispatchResult, RebuildError, Result};
use crate::matrix::DispatchJob;

/// Lifecycle of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    Triggered,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::Succeeded
                | DispatchState::Failed
                | DispatchState::TimedOut
                | DispatchState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: DispatchState) -> bool {
        use DispatchState::*;
        match (self, next) {
            (Pending, Triggered) | (Pending, Failed) => true,
            (Pending, TimedOut) | (Pending, Cancelled) => true,
            (Triggered, Polling) | (Triggered, Failed) => true,
            (Triggered, TimedOut) | (Triggered, Cancelled) => true,
            (Polling, Polling) => true,
            (Polling, Succeeded) | (Polling, Failed) => true,
            (Polling, TimedOut) | (Polling, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Pending => "pending",
            DispatchState::Triggered => "triggered",
            DispatchState::Polling => "polling",
            DispatchState::Succeeded => "succeeded",
            DispatchState::Failed => "failed",
            DispatchState::TimedOut => "timed_out",
            DispatchState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a run started by [`WorkflowTrigger::trigger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRun {
    pub id: u64,
    pub url: Option<String>,
}

/// Final verdict of a completed remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    Other(String),
}

impl Conclusion {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => Conclusion::Success,
            "failure" => Conclusion::Failure,
            "cancelled" => Conclusion::Cancelled,
            "timed_out" => Conclusion::TimedOut,
            other => Conclusion::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conclusion::Success => f.write_str("success"),
            Conclusion::Failure => f.write_str("failure"),
            Conclusion::Cancelled => f.write_str("cancelled"),
            Conclusion::TimedOut => f.write_str("timed_out"),
            Conclusion::Other(raw) => f.write_str(raw),
        }
    }
}

/// Status reported by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    InProgress,
    Completed(Conclusion),
}

/// Remote workflow-trigger API.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    /// Start the job's workflow on its branch and return the created run.
    async fn trigger(&self, job: &DispatchJob) -> DispatchResult<RemoteRun>;

    /// Check the current status of a previously triggered run.
    async fn poll(&self, job: &DispatchJob, run: &RemoteRun) -> DispatchResult<RemoteStatus>;
}

/// Polling cadence and wait budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub poll_interval: Duration,
    /// Upper bound on the trigger call, including locating the new run.
    pub trigger_timeout: Duration,
    /// Upper bound on waiting for completion once the run was triggered.
    pub wait_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            trigger_timeout: Duration::from_secs(5 * 60),
            wait_timeout: Duration::from_secs(3 * 60 * 60),
        }
    }
}

/// Terminal report for one (repository, branch) cell.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub job: DispatchJob,
    pub state: DispatchState,
    pub run: Option<RemoteRun>,
    pub detail: Option<String>,
    pub polls: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == DispatchState::Succeeded
    }

    pub fn label(&self) -> String {
        self.job.label()
    }
}

/// Tracks one job's state and enforces legal transitions.
struct JobTracker {
    job: DispatchJob,
    state: DispatchState,
    run: Option<RemoteRun>,
    detail: Option<String>,
    polls: u32,
    started_at: DateTime<Utc>,
    clock: tokio::time::Instant,
}

impl JobTracker {
    fn new(job: DispatchJob) -> Self {
        Self {
            job,
            state: DispatchState::Pending,
            run: None,
            detail: None,
            polls: 0,
            started_at: Utc::now(),
            clock: tokio::time::Instant::now(),
        }
    }

    fn advance(&mut self, next: DispatchState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RebuildError::InvalidTransition {
                job: self.job.label(),
                from: self.state,
                to: next,
            });
        }
        debug!(job = %self.job, from = %self.state, to = %next, "dispatch transition");
        self.state = next;
        Ok(())
    }

    fn finish(mut self, state: DispatchState, detail: Option<String>) -> DispatchOutcome {
        if let Err(err) = self.advance(state) {
            // Only reachable through a logic error; keep the cell visible as failed.
            warn!(error = %err, "forcing dispatch to failed");
            self.state = DispatchState::Failed;
            self.detail = Some(err.to_string());
        } else if detail.is_some() {
            self.detail = detail;
        }
        DispatchOutcome {
            job: self.job,
            state: self.state,
            run: self.run,
            detail: self.detail,
            polls: self.polls,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.clock.elapsed().as_millis() as u64,
        }
    }
}

/// Triggers remote workflows and waits for them to finish.
pub struct Dispatcher {
    trigger: Arc<dyn WorkflowTrigger>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(trigger: Arc<dyn WorkflowTrigger>, settings: DispatchSettings) -> Self {
        Self { trigger, settings }
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    /// Trigger `job` and block until it reaches a terminal state.
    ///
    /// Never returns an error: every failure is folded into the outcome so
    /// sibling jobs are unaffected.
    pub async fn run_job(&self, job: DispatchJob, cancel: CancellationToken) -> DispatchOutcome {
        let mut tracker = JobTracker::new(job);
        info!(job = %tracker.job, workflow = %tracker.job.target.workflow, "triggering workflow");

        let triggered = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(
                self.settings.trigger_timeout,
                self.trigger.trigger(&tracker.job),
            ) => Some(res),
        };
        let run = match triggered {
            None => {
                return tracker.finish(
                    DispatchState::Cancelled,
                    Some("cancelled before trigger".to_string()),
                )
            }
            Some(Err(_)) => {
                let secs = self.settings.trigger_timeout.as_secs();
                warn!(job = %tracker.job, timeout_secs = secs, "trigger call did not return");
                return tracker.finish(
                    DispatchState::TimedOut,
                    Some(format!("trigger did not complete within {secs}s")),
                );
            }
            Some(Ok(Err(err))) => {
                warn!(job = %tracker.job, error = %err, "trigger failed");
                return tracker.finish(DispatchState::Failed, Some(err.to_string()));
            }
            Some(Ok(Ok(run))) => run,
        };

        info!(job = %tracker.job, run_id = run.id, url = run.url.as_deref().unwrap_or(""), "workflow triggered");
        tracker.run = Some(run.clone());
        if let Err(err) = tracker.advance(DispatchState::Triggered) {
            return tracker.finish(DispatchState::Failed, Some(err.to_string()));
        }

        let waited = tokio::time::timeout(
            self.settings.wait_timeout,
            self.wait_for_completion(&mut tracker, &run, &cancel),
        )
        .await;

        match waited {
            Ok((state, detail)) => {
                match state {
                    DispatchState::Succeeded => info!(job = %tracker.job, "workflow succeeded"),
                    _ => warn!(job = %tracker.job, state = %state, detail = detail.as_deref().unwrap_or(""), "workflow did not succeed"),
                }
                tracker.finish(state, detail)
            }
            Err(_) => {
                warn!(job = %tracker.job, timeout_secs = self.settings.wait_timeout.as_secs(), "gave up waiting for workflow");
                let detail = format!(
                    "no terminal status after {}s ({} poll(s))",
                    self.settings.wait_timeout.as_secs(),
                    tracker.polls
                );
                tracker.finish(DispatchState::TimedOut, Some(detail))
            }
        }
    }

    async fn wait_for_completion(
        &self,
        tracker: &mut JobTracker,
        run: &RemoteRun,
        cancel: &CancellationToken,
    ) -> (DispatchState, Option<String>) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return (
                        DispatchState::Cancelled,
                        Some("wait cancelled; remote run left running".to_string()),
                    );
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            if let Err(err) = tracker.advance(DispatchState::Polling) {
                return (DispatchState::Failed, Some(err.to_string()));
            }
            tracker.polls += 1;

            match self.trigger.poll(&tracker.job, run).await {
                Ok(RemoteStatus::Completed(Conclusion::Success)) => {
                    return (DispatchState::Succeeded, None);
                }
                Ok(RemoteStatus::Completed(conclusion)) => {
                    return (
                        DispatchState::Failed,
                        Some(format!("remote run concluded with {conclusion}")),
                    );
                }
                Ok(status) => {
                    debug!(job = %tracker.job, poll = tracker.polls, status = ?status, "workflow still running");
                }
                Err(err) => {
                    return (DispatchState::Failed, Some(err.to_string()));
                }
            }
        }
    }
}
