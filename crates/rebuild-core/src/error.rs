//! Error taxonomy for branch selection and rebuild dispatch.

use thiserror::Error;

use crate::dispatch::DispatchState;

/// A single failed attempt at listing branches.
///
/// Every variant is treated as transient by [`crate::lister::BranchLister`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The hosting API answered with a non-2xx status.
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded as a branch list.
    #[error("malformed branch list: {0}")]
    Decode(String),
}

/// A failed call against the remote workflow-trigger API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatch request itself was rejected or could not be sent.
    #[error("workflow trigger failed: {0}")]
    Trigger(String),

    /// The dispatch was accepted but no matching run showed up.
    #[error("triggered run for {job} could not be located")]
    RunNotFound { job: String },

    /// A status check failed.
    #[error("status poll failed: {0}")]
    Poll(String),
}

/// Convenience alias for [`crate::dispatch::WorkflowTrigger`] calls.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Errors produced by the rebuild core.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// Listing branches kept failing until retries were exhausted.
    #[error("failed to list branches of {repo} after {attempts} attempt(s): {source}")]
    ListingFailed {
        repo: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("invalid branch name: {0:?}")]
    InvalidBranchName(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("illegal dispatch transition for {job}: {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: DispatchState,
        to: DispatchState,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for rebuild core operations.
pub type Result<T> = std::result::Result<T, RebuildError>;
