//! Runtime configuration.

use crate::policy::{
    ExecutionFailureDraftingPolicy, ExecutionFailurePolicy, IntegrityFailurePolicy, TargetOutputCapture,
    TestFailurePolicy, TestShardingPolicy,
};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Failure handling and execution policies applied to every sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimePolicies {
    pub execution_failure: ExecutionFailurePolicy,
    pub execution_failure_drafting: ExecutionFailureDraftingPolicy,
    pub test_failure: TestFailurePolicy,
    pub integrity_failure: IntegrityFailurePolicy,
    pub test_sharding: TestShardingPolicy,
    pub target_output_capture: TargetOutputCapture,
}

/// `target` depends on `depends_on`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyEdge {
    pub target: String,
    pub depends_on: String,
}

/// Configuration of a [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Root that absolute coverage paths are made relative to.
    pub repo_root: PathBuf,
    /// Persisted coverage ("TIA data") file.
    pub tia_file: PathBuf,
    /// Directory holding the run history database. No history when unset.
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
    #[serde(default)]
    pub excluded_test_targets: Vec<String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub dependency_graph: Vec<DependencyEdge>,
    #[serde(default)]
    pub policies: RuntimePolicies,
}

impl RuntimeConfig {
    pub fn new(repo_root: impl Into<PathBuf>, tia_file: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            tia_file: tia_file.into(),
            history_dir: None,
            excluded_test_targets: Vec::new(),
            max_concurrency: None,
            dependency_graph: Vec::new(),
            policies: RuntimePolicies::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn with_policies(mut self, policies: RuntimePolicies) -> Self {
        self.policies = policies;
        self
    }

    #[must_use]
    pub fn with_excluded<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_test_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(dir.into());
        self
    }
}
