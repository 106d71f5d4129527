//! Test impact analysis.
//!
//! Keeps a map from source files to the build targets that compile them and
//! the test targets known to cover them, selects the test targets affected by
//! a change list, runs them through a [`TestEngine`], and folds the coverage
//! they produce back into a persisted coverage file.
//!
//! [`Runtime`] is the entry point.

pub mod config;
pub mod dependency;
pub mod engine;
pub mod normalize;
pub mod policy;
pub mod runtime;
pub mod store;
pub mod target;

pub use config::{ConfigError, DependencyEdge, RuntimeConfig, RuntimePolicies};
pub use dependency::{ChangeDependencyList, ChangeList, DynamicDependencyMap, SourceCoveringTestsList, SourceDependency};
pub use engine::{
    JobLauncher, JobOutput, JobSpec, PooledTestEngine, RunOptions, RunOutcome, SequenceResult, TestEngine, TestJob,
    TestRunResult,
};
pub use normalize::RepoPath;
pub use runtime::{
    Runtime, RuntimeError, SequenceEnd, SequenceObserver, SequenceOptions, SequenceReport, SequenceStart,
    TestRunSelection,
};
pub use target::descriptor::{BuildTargetDescriptor, ProductionTargetDescriptor, TestTargetDescriptor};
