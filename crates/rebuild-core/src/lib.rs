//! Rebuild Core - periodic image rebuild orchestration
//!
//! Picks the release branches worth rebuilding and re-triggers the build
//! workflow of every configured repository on each of them:
//!
//! - [`lister::BranchLister`] lists branches with bounded retries
//! - [`branch::BranchSelector`] keeps the newest `<major>.<minor>.x` branches
//!   plus the rolling branch
//! - [`matrix::BuildMatrix`] expands repository × branch into jobs
//! - [`dispatch::Dispatcher`] triggers one workflow and polls it to completion
//! - [`runner::RebuildRunner`] fans out all jobs and collects a report

pub mod branch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fakes;
pub mod lister;
pub mod matrix;
pub mod runner;
pub mod target;
pub mod telemetry;

pub use branch::{select_branches, BranchName, BranchSelector, BranchSet, ReleaseVersion};
pub use config::RebuildConfig;
pub use dispatch::{
    Conclusion, DispatchOutcome, DispatchSettings, DispatchState, Dispatcher, RemoteRun,
    RemoteStatus, WorkflowTrigger,
};
pub use error::{DispatchError, DispatchResult, FetchError, RebuildError, Result};
pub use lister::{BranchLister, BranchSource, RetryPolicy};
pub use matrix::{BuildMatrix, DispatchJob};
pub use runner::{RebuildReport, RebuildRunner};
pub use target::{Payload, PayloadValue, RepoRef, RepoTarget};
pub use telemetry::init_tracing;
