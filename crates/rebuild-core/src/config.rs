//! Rebuild configuration.
//!
//! Loaded from a TOML file; every field has a default so an absent file (or
//! an empty one) reproduces the stock rebuild set.
//!
//! ```toml
//! owner = "mlrun"
//! workflow = "build.yaml"
//!
//! [source]
//! owner = "mlrun"
//! repo = "mlrun"
//!
//! [[targets]]
//! repo = "mlrun"
//! payload = { skip_images = "models-gpu,models,base,tests", build_from_cache = "false" }
//!
//! [[targets]]
//! repo = "ui"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::branch::{BranchName, BranchSelector, DEFAULT_KEEP_RELEASES, DEFAULT_ROLLING_BRANCH};
use crate::dispatch::DispatchSettings;
use crate::error::{RebuildError, Result};
use crate::lister::RetryPolicy;
use crate::target::{Payload, RepoRef, RepoTarget};

const DEFAULT_OWNER: &str = "mlrun";
const DEFAULT_WORKFLOW: &str = "build.yaml";

/// Repository whose branches decide the `branch` axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            repo: "mlrun".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            retry_delay_ms: policy.delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub poll_interval_secs: u64,
    pub trigger_timeout_secs: u64,
    pub wait_timeout_secs: u64,
    /// Cells in flight at once; unset means unbounded.
    pub max_parallel: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let settings = DispatchSettings::default();
        Self {
            poll_interval_secs: settings.poll_interval.as_secs(),
            trigger_timeout_secs: settings.trigger_timeout.as_secs(),
            wait_timeout_secs: settings.wait_timeout.as_secs(),
            max_parallel: None,
        }
    }
}

/// One `[[targets]]` entry. `owner` and `workflow` fall back to the
/// top-level values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub repo: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    pub owner: String,
    pub workflow: String,
    pub rolling_branch: String,
    pub keep_releases: usize,
    pub source: SourceConfig,
    pub listing: ListingConfig,
    pub dispatch: DispatchConfig,
    pub targets: Vec<TargetConfig>,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        let mlrun_payload: Payload = [
            ("skip_images", "models-gpu,models,base,tests"),
            ("build_from_cache", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect();

        Self {
            owner: DEFAULT_OWNER.to_string(),
            workflow: DEFAULT_WORKFLOW.to_string(),
            rolling_branch: DEFAULT_ROLLING_BRANCH.to_string(),
            keep_releases: DEFAULT_KEEP_RELEASES,
            source: SourceConfig::default(),
            listing: ListingConfig::default(),
            dispatch: DispatchConfig::default(),
            targets: vec![
                TargetConfig {
                    repo: "mlrun".to_string(),
                    owner: None,
                    workflow: None,
                    payload: mlrun_payload,
                },
                TargetConfig {
                    repo: "ui".to_string(),
                    owner: None,
                    workflow: None,
                    payload: Payload::new(),
                },
            ],
        }
    }
}

impl RebuildConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: RebuildConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading rebuild config");
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load `path` if given, otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(RebuildError::Config("at least one target is required".into()));
        }
        if let Some(t) = self.targets.iter().find(|t| t.repo.trim().is_empty()) {
            return Err(RebuildError::Config(format!("target with empty repo name: {t:?}")));
        }
        if self.keep_releases == 0 {
            return Err(RebuildError::Config("keep_releases must be at least 1".into()));
        }
        if self.listing.max_attempts == 0 {
            return Err(RebuildError::Config("listing.max_attempts must be at least 1".into()));
        }
        if self.dispatch.poll_interval_secs == 0 {
            return Err(RebuildError::Config(
                "dispatch.poll_interval_secs must be positive".into(),
            ));
        }
        if self.dispatch.trigger_timeout_secs == 0 {
            return Err(RebuildError::Config(
                "dispatch.trigger_timeout_secs must be positive".into(),
            ));
        }
        if self.dispatch.wait_timeout_secs < self.dispatch.poll_interval_secs {
            return Err(RebuildError::Config(
                "dispatch.wait_timeout_secs must not be shorter than the poll interval".into(),
            ));
        }
        if self.dispatch.max_parallel == Some(0) {
            return Err(RebuildError::Config("dispatch.max_parallel must be positive".into()));
        }
        BranchName::new(self.rolling_branch.clone())?;
        Ok(())
    }

    pub fn source_repo(&self) -> RepoRef {
        RepoRef::new(&self.source.owner, &self.source.repo)
    }

    pub fn selector(&self) -> Result<BranchSelector> {
        Ok(BranchSelector::new(
            BranchName::new(self.rolling_branch.clone())?,
            self.keep_releases,
        ))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.listing.max_attempts,
            delay: Duration::from_millis(self.listing.retry_delay_ms),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            poll_interval: Duration::from_secs(self.dispatch.poll_interval_secs),
            trigger_timeout: Duration::from_secs(self.dispatch.trigger_timeout_secs),
            wait_timeout: Duration::from_secs(self.dispatch.wait_timeout_secs),
        }
    }

    /// The fixed `repo` axis, with defaults resolved.
    pub fn repo_targets(&self) -> Vec<RepoTarget> {
        self.targets
            .iter()
            .map(|t| RepoTarget {
                repo: RepoRef::new(t.owner.as_deref().unwrap_or(&self.owner), &t.repo),
                workflow: t.workflow.clone().unwrap_or_else(|| self.workflow.clone()),
                payload: t.payload.clone(),
            })
            .collect()
    }
}
