//! Repositories whose build workflow gets re-triggered.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A workflow input value. Passed through to the remote workflow unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Flag(bool),
    Text(String),
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Flag(value)
    }
}

/// Repository-specific workflow inputs.
pub type Payload = BTreeMap<String, PayloadValue>;

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One entry of the fixed `repo` matrix axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    /// Repository to build.
    pub repo: RepoRef,

    /// Workflow file (or numeric id) to dispatch, e.g. `build.yaml`.
    pub workflow: String,

    /// Inputs handed to the workflow.
    #[serde(default)]
    pub payload: Payload,
}

impl RepoTarget {
    pub fn new(repo: RepoRef, workflow: impl Into<String>) -> Self {
        Self {
            repo,
            workflow: workflow.into(),
            payload: Payload::new(),
        }
    }

    /// Add a workflow input.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Payload as a JSON object.
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.payload).unwrap_or_else(|_| serde_json::json!({}))
    }
}
