//! The job launcher seam.
//!
//! A launcher turns one [`JobSpec`] into a running test binary and reports its
//! parsed output. Process spawning and result parsing live behind this trait.

use crate::policy::TargetOutputCapture;
use crate::target::descriptor::LaunchMethod;
use crate::target::{HasBuildTarget, TestTarget};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that prevent a job from executing.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to launch '{target}': {message}")]
    Spawn { target: String, message: String },
    #[error("'{target}' exited abnormally with code {code:?}")]
    Crashed { target: String, code: Option<i32> },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a job should do with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobMode {
    Regular,
    Instrumented,
    /// List the target's test cases without running them.
    Enumerate,
}

/// One slice of a sharded test target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shard {
    pub index: u32,
    pub count: u32,
}

/// Everything a launcher needs to run one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub target: String,
    pub output_name: String,
    pub launch_method: LaunchMethod,
    pub mode: JobMode,
    pub shard: Option<Shard>,
    pub output_capture: TargetOutputCapture,
}

impl JobSpec {
    pub fn new(target: &TestTarget, mode: JobMode, output_capture: TargetOutputCapture) -> Self {
        Self {
            target: target.name().to_string(),
            output_name: target.build_target().output_name().to_string(),
            launch_method: target.launch_method(),
            mode,
            shard: None,
            output_capture,
        }
    }

    pub fn with_shard(mut self, index: u32, count: u32) -> Self {
        self.shard = Some(Shard { index, count });
        self
    }
}

/// Outcome of the tests inside a job that executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    AllTestsPass,
    TestFailures,
}

/// Parsed output of a job that executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub outcome: TestOutcome,
    /// Covered source paths; only instrumented jobs report them.
    pub coverage: Option<Vec<String>>,
    pub std_output: Option<String>,
}

impl JobOutput {
    pub fn passed() -> Self {
        Self {
            outcome: TestOutcome::AllTestsPass,
            coverage: None,
            std_output: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            outcome: TestOutcome::TestFailures,
            ..Self::passed()
        }
    }

    pub fn with_coverage<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.coverage = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_std_output(mut self, output: impl Into<String>) -> Self {
        self.std_output = Some(output.into());
        self
    }
}

pub type LaunchFuture = Pin<Box<dyn Future<Output = Result<JobOutput, LaunchError>> + Send>>;

/// Launches test jobs.
///
/// The returned future is dropped when the job times out; launchers built on
/// child processes should kill the child on drop.
pub trait JobLauncher: Send + Sync + 'static {
    fn launch(&self, spec: JobSpec) -> LaunchFuture;
}
