//! Error types for the GitHub adapter

use rebuild_core::FetchError;
use thiserror::Error;

/// Errors talking to the GitHub REST API
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Request could not be sent or the response not read
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("GitHub API returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client construction failed
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        GitHubError::Http(err.to_string())
    }
}

impl From<GitHubError> for FetchError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::Status { status, body, .. } => FetchError::Status { status, body },
            GitHubError::Json(e) => FetchError::Decode(e.to_string()),
            other => FetchError::Transport(other.to_string()),
        }
    }
}
