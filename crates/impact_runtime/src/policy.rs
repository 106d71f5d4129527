//! Failure, execution and selection policies.
//!
//! Policies are plain configuration values. They are threaded through every
//! execution call and interpreted at the point of failure.

use serde::{Deserialize, Serialize};

/// What to do when a test target fails to launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailurePolicy {
    /// Stop dispatching further test targets.
    Abort,
    /// Mark the job as failed and keep going.
    #[default]
    Continue,
    /// Keep going and do not count the failure against the sequence result.
    Ignore,
}

/// Whether test targets that previously failed to execute are drafted into
/// the next impact analysis sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailureDraftingPolicy {
    Always,
    #[default]
    Never,
}

/// What to do when a test target reports failing tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFailurePolicy {
    #[default]
    Abort,
    Continue,
}

/// What to do when persisted or instrumented data fails integrity checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFailurePolicy {
    #[default]
    Abort,
    Continue,
}

/// Whether shardable test targets are split across concurrent jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestShardingPolicy {
    Always,
    #[default]
    Never,
}

/// Where the standard output of test targets is captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutputCapture {
    #[default]
    None,
    StdOut,
    File,
    StdOutAndFile,
}

impl TargetOutputCapture {
    /// Whether captured output is kept on the resulting job.
    pub fn captures_stdout(self) -> bool {
        matches!(self, Self::StdOut | Self::StdOutAndFile)
    }
}

/// How selected test targets are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPrioritizationPolicy {
    /// Stable declaration order.
    #[default]
    None,
    /// Closest dependency-graph distance to the changed production targets first.
    DependencyLocality,
}

/// Whether an impact analysis sequence updates the dependency map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicDependencyMapPolicy {
    Discard,
    #[default]
    Update,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn policies_deserialize_from_snake_case() {
        let policy: ExecutionFailurePolicy = serde_json::from_str("\"ignore\"").unwrap();
        assert_eq!(policy, ExecutionFailurePolicy::Ignore);
        let capture: TargetOutputCapture = serde_json::from_str("\"std_out_and_file\"").unwrap();
        assert_eq!(capture, TargetOutputCapture::StdOutAndFile);
    }

    #[test]
    fn only_stdout_variants_capture_stdout() {
        assert!(TargetOutputCapture::StdOut.captures_stdout());
        assert!(TargetOutputCapture::StdOutAndFile.captures_stdout());
        assert!(!TargetOutputCapture::File.captures_stdout());
        assert!(!TargetOutputCapture::None.captures_stdout());
    }
}
