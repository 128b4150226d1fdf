//! Fan-out over the build matrix and aggregate reporting.
//!
//! All cells run to a terminal state independently; the report is only
//! assembled once every cell has finished.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatch::{DispatchOutcome, DispatchState, Dispatcher};
use crate::matrix::{BuildMatrix, DispatchJob};

/// Aggregated result of one rebuild run.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    /// One entry per matrix cell, in matrix order.
    pub outcomes: Vec<DispatchOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RebuildReport {
    /// `true` only when every cell succeeded.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.succeeded())
    }

    pub fn count(&self, state: DispatchState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Cell counts keyed by terminal state.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.state.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Labels (`owner/repo@branch`) of every cell that did not succeed.
    pub fn failed_cells(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.label())
            .collect()
    }

    /// Markdown summary table.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## Image rebuild\n\n");
        out.push_str(&format!(
            "**{}**: {} of {} cell(s) succeeded\n\n",
            if self.success() { "PASS" } else { "FAIL" },
            self.count(DispatchState::Succeeded),
            self.outcomes.len()
        ));
        out.push_str("| Repository | Branch | Result | Run | Detail |\n");
        out.push_str("|---|---|---|---|---|\n");
        for o in &self.outcomes {
            let run = match &o.run {
                Some(run) => match &run.url {
                    Some(url) => format!("[{}]({})", run.id, url),
                    None => run.id.to_string(),
                },
                None => "-".to_string(),
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                o.job.target.repo,
                o.job.branch,
                o.state,
                run,
                table_cell(o.detail.as_deref().unwrap_or(""))
            ));
        }
        out
    }
}

/// Longest detail kept in a report row.
const MAX_DETAIL_CHARS: usize = 200;

/// Flatten `text` onto one line, escape pipes and cap its length.
fn table_cell(text: &str) -> String {
    let flat = text
        .split(|c| c == '\n' || c == '\r')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mut cell: String = flat.chars().take(MAX_DETAIL_CHARS).collect();
    if flat.chars().count() > MAX_DETAIL_CHARS {
        cell.push('…');
    }
    cell.replace('|', "\\|")
}

/// Runs every matrix cell through the [`Dispatcher`].
pub struct RebuildRunner {
    dispatcher: Arc<Dispatcher>,
    max_parallel: Option<usize>,
}

impl RebuildRunner {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            max_parallel: None,
        }
    }

    /// Bound the number of cells in flight at once.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.filter(|n| *n > 0);
        self
    }

    pub async fn run(&self, matrix: &BuildMatrix, cancel: CancellationToken) -> RebuildReport {
        self.run_jobs(matrix.jobs(), cancel).await
    }

    /// Dispatch `jobs` concurrently and wait for all of them.
    ///
    /// A failing or panicking cell never stops its siblings.
    pub async fn run_jobs(
        &self,
        jobs: Vec<DispatchJob>,
        cancel: CancellationToken,
    ) -> RebuildReport {
        let started_at = Utc::now();
        info!(cells = jobs.len(), max_parallel = ?self.max_parallel, "starting rebuild fan-out");

        let limiter = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let mut join_set = JoinSet::new();

        for (idx, job) in jobs.iter().cloned().enumerate() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                (idx, dispatcher.run_job(job, cancel).await)
            });
        }

        let mut slots: Vec<Option<DispatchOutcome>> = vec![None; jobs.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                // The cell's slot stays empty and is reported as failed below.
                Err(err) => error!(error = %err, "dispatch task aborted"),
            }
        }

        let outcomes: Vec<DispatchOutcome> = slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| slot.unwrap_or_else(|| aborted(job)))
            .collect();

        let report = RebuildReport {
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            success = report.success(),
            failed = report.failed_cells().len(),
            "rebuild fan-out finished"
        );
        report
    }
}

fn aborted(job: DispatchJob) -> DispatchOutcome {
    let now = Utc::now();
    DispatchOutcome {
        job,
        state: DispatchState::Failed,
        run: None,
        detail: Some("dispatch task aborted before reporting".to_string()),
        polls: 0,
        started_at: now,
        finished_at: now,
        duration_ms: 0,
    }
}
