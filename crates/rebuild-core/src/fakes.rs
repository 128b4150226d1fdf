//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `ScriptedBranchSource` and `ScriptedTrigger`, which replay
//! pre-programmed responses without touching the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dispatch::{Conclusion, RemoteRun, RemoteStatus, WorkflowTrigger};
use crate::error::{DispatchError, DispatchResult, FetchError};
use crate::lister::BranchSource;
use crate::matrix::DispatchJob;
use crate::target::RepoRef;

// ---------------------------------------------------------------------------
// ScriptedBranchSource
// ---------------------------------------------------------------------------

/// Replays a queue of listing results, one per call.
///
/// Once the queue is drained every further call fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedBranchSource {
    responses: Mutex<VecDeque<Result<Vec<String>, FetchError>>>,
    calls: Mutex<u32>,
}

impl ScriptedBranchSource {
    pub fn new(responses: Vec<Result<Vec<String>, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        }
    }

    /// Always answers with the same branch list.
    pub fn fixed(names: &[&str]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        Self::new(vec![Ok(names); 16])
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl BranchSource for ScriptedBranchSource {
    async fn fetch_branch_names(&self, _repo: &RepoRef) -> Result<Vec<String>, FetchError> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".to_string())))
    }
}

// ---------------------------------------------------------------------------
// ScriptedTrigger
// ---------------------------------------------------------------------------

/// Behaviour of one job label (`owner/repo@branch`).
#[derive(Debug, Clone)]
pub struct Script {
    trigger_error: Option<DispatchError>,
    trigger_hangs: bool,
    panics: bool,
    poll_error: Option<DispatchError>,
    running_polls: u32,
    conclusion: Option<Conclusion>,
}

impl Script {
    /// `running` in-progress polls, then the given conclusion.
    pub fn completes_after(running: u32, conclusion: Conclusion) -> Self {
        Self {
            trigger_error: None,
            trigger_hangs: false,
            panics: false,
            poll_error: None,
            running_polls: running,
            conclusion: Some(conclusion),
        }
    }

    /// Stays in progress forever.
    pub fn never_completes() -> Self {
        Self {
            trigger_error: None,
            trigger_hangs: false,
            panics: false,
            poll_error: None,
            running_polls: 0,
            conclusion: None,
        }
    }

    pub fn trigger_error(err: DispatchError) -> Self {
        Self {
            trigger_error: Some(err),
            ..Self::never_completes()
        }
    }

    /// The trigger call never returns.
    pub fn trigger_hangs() -> Self {
        Self {
            trigger_hangs: true,
            ..Self::never_completes()
        }
    }

    /// The trigger call panics, taking its task down with it.
    pub fn panics() -> Self {
        Self {
            panics: true,
            ..Self::never_completes()
        }
    }

    pub fn poll_error(err: DispatchError) -> Self {
        Self {
            poll_error: Some(err),
            ..Self::never_completes()
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    triggers: u32,
    polls: u32,
}

/// Workflow trigger driven by per-label [`Script`]s.
///
/// Labels without a script succeed on the first poll.
#[derive(Debug, Default)]
pub struct ScriptedTrigger {
    scripts: Mutex<HashMap<String, Script>>,
    counters: Mutex<HashMap<String, Counters>>,
    next_run: AtomicU64,
}

impl ScriptedTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, label: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(label.to_string(), script);
    }

    pub fn trigger_count(&self, label: &str) -> u32 {
        self.counters
            .lock()
            .unwrap()
            .get(label)
            .map(|c| c.triggers)
            .unwrap_or(0)
    }

    pub fn poll_count(&self, label: &str) -> u32 {
        self.counters
            .lock()
            .unwrap()
            .get(label)
            .map(|c| c.polls)
            .unwrap_or(0)
    }

    fn script_for(&self, label: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(label)
            .cloned()
            .unwrap_or_else(|| Script::completes_after(0, Conclusion::Success))
    }
}

#[async_trait]
impl WorkflowTrigger for ScriptedTrigger {
    async fn trigger(&self, job: &DispatchJob) -> DispatchResult<RemoteRun> {
        let label = job.label();
        self.counters
            .lock()
            .unwrap()
            .entry(label.clone())
            .or_default()
            .triggers += 1;

        let script = self.script_for(&label);
        if script.panics {
            panic!("scripted panic in trigger for {label}");
        }
        if script.trigger_hangs {
            std::future::pending::<()>().await;
        }
        if let Some(err) = script.trigger_error {
            return Err(err);
        }
        let id = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteRun {
            id,
            url: Some(format!("https://ci.invalid/runs/{id}")),
        })
    }

    async fn poll(&self, job: &DispatchJob, _run: &RemoteRun) -> DispatchResult<RemoteStatus> {
        let label = job.label();
        let polls = {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(label.clone()).or_default();
            entry.polls += 1;
            entry.polls
        };

        let script = self.script_for(&label);
        if let Some(err) = script.poll_error {
            return Err(err);
        }
        match script.conclusion {
            Some(conclusion) if polls > script.running_polls => {
                Ok(RemoteStatus::Completed(conclusion))
            }
            _ if polls == 1 => Ok(RemoteStatus::Queued),
            _ => Ok(RemoteStatus::InProgress),
        }
    }
}
