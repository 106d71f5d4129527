//! Test execution.
//!
//! [`TestEngine`] is the seam between sequence orchestration and the
//! machinery that actually runs test binaries. [`PooledTestEngine`] is the
//! production implementation: a bounded worker pool dispatching jobs to a
//! [`JobLauncher`].

pub mod launcher;
pub mod pool;

pub use launcher::{JobLauncher, JobMode, JobOutput, JobSpec, LaunchError, LaunchFuture, Shard, TestOutcome};
pub use pool::PooledTestEngine;

use crate::dependency::SourceCoveringTestsList;
use crate::normalize::RepoPath;
use crate::policy::{
    ExecutionFailurePolicy, IntegrityFailurePolicy, TargetOutputCapture, TestFailurePolicy, TestShardingPolicy,
};
use crate::target::TestTarget;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors from the engine itself, as opposed to the jobs it runs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start worker runtime: {0}")]
    RuntimeInit(#[source] std::io::Error),
}

/// Result of running a single test target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestRunResult {
    /// Never dispatched: a policy halted the run or the global budget ran out.
    NotRun,
    /// The launcher could not run the target.
    FailedToExecute,
    /// The per-target or global timeout was reached.
    Timeout,
    /// The target ran and at least one test failed.
    TestFailures,
    AllTestsPass,
}

impl TestRunResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TestRunResult::NotRun => "not_run",
            TestRunResult::FailedToExecute => "failed_to_execute",
            TestRunResult::Timeout => "timeout",
            TestRunResult::TestFailures => "test_failures",
            TestRunResult::AllTestsPass => "all_tests_pass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_run" => Some(TestRunResult::NotRun),
            "failed_to_execute" => Some(TestRunResult::FailedToExecute),
            "timeout" => Some(TestRunResult::Timeout),
            "test_failures" => Some(TestRunResult::TestFailures),
            "all_tests_pass" => Some(TestRunResult::AllTestsPass),
            _ => None,
        }
    }

    /// Whether the target actually ran to completion.
    pub fn executed(self) -> bool {
        matches!(self, TestRunResult::AllTestsPass | TestRunResult::TestFailures)
    }
}

/// Overall result of a run or sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceResult {
    Success,
    Failure,
    Timeout,
}

impl SequenceResult {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceResult::Success => "success",
            SequenceResult::Failure => "failure",
            SequenceResult::Timeout => "timeout",
        }
    }

    /// Combines the results of two consecutive runs; the worse one wins.
    pub fn combine(self, other: SequenceResult) -> SequenceResult {
        use SequenceResult::{Failure, Success, Timeout};
        match (self, other) {
            (Timeout, _) | (_, Timeout) => Timeout,
            (Failure, _) | (_, Failure) => Failure,
            (Success, Success) => Success,
        }
    }
}

/// The outcome of one test target within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestJob {
    pub target: String,
    pub result: TestRunResult,
    pub duration: Duration,
    /// Covered source paths as reported by instrumentation, unnormalized.
    pub coverage: Option<Vec<String>>,
    pub std_output: Option<String>,
}

impl TestJob {
    pub fn not_run(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            result: TestRunResult::NotRun,
            duration: Duration::ZERO,
            coverage: None,
            std_output: None,
        }
    }
}

/// Callback fired whenever a test target completes.
pub type JobCallback = Arc<dyn Fn(&TestJob) + Send + Sync>;

/// Per-run options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub sharding: TestShardingPolicy,
    pub execution_failure: ExecutionFailurePolicy,
    pub test_failure: TestFailurePolicy,
    pub output_capture: TargetOutputCapture,
    pub target_timeout: Option<Duration>,
    pub global_timeout: Option<Duration>,
}

/// Result of a run plus one job per requested target, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub result: SequenceResult,
    pub jobs: Vec<TestJob>,
}

/// Runs test targets.
pub trait TestEngine {
    /// Runs the targets without instrumentation.
    fn regular_run(
        &self,
        targets: &[&TestTarget],
        options: &RunOptions,
        on_complete: Option<JobCallback>,
    ) -> Result<RunOutcome, EngineError>;

    /// Runs the targets under coverage instrumentation.
    ///
    /// A completed job without coverage is an integrity failure, handled
    /// according to `integrity`.
    fn instrumented_run(
        &self,
        targets: &[&TestTarget],
        options: &RunOptions,
        integrity: IntegrityFailurePolicy,
        on_complete: Option<JobCallback>,
    ) -> Result<RunOutcome, EngineError>;

    /// Refreshes the cached test case lists of the targets.
    fn update_enumeration_cache(&self, targets: &[&TestTarget], options: &RunOptions) -> Result<(), EngineError>;
}

/// Builds a coverage delta from instrumented jobs.
///
/// Only jobs that ran to completion contribute. Absolute paths are made
/// relative to `repo_root`; paths outside it are skipped.
pub fn coverage_from_jobs(jobs: &[TestJob], repo_root: &str) -> SourceCoveringTestsList {
    let mut delta = SourceCoveringTestsList::new();
    for job in jobs {
        if !job.result.executed() {
            continue;
        }
        let Some(coverage) = &job.coverage else {
            continue;
        };
        let sources: BTreeSet<RepoPath> = coverage
            .iter()
            .filter_map(|raw| match RepoPath::relative_to(raw, repo_root) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(test_target = %job.target, source = %raw, error = %e, "skipping covered source");
                    None
                }
            })
            .collect();
        for source in sources {
            delta.insert(source, [job.target.as_str()]);
        }
    }
    delta
}
