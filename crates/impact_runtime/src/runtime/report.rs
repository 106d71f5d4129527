//! Sequence notifications and reports.

use crate::engine::{RunOutcome, SequenceResult, TestJob, TestRunResult};
use std::time::Duration;

/// The kinds of test sequence the runtime drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Regular,
    Seeded,
    ImpactAnalysis,
    SafeImpactAnalysis,
}

impl SequenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceKind::Regular => "regular",
            SequenceKind::Seeded => "seeded",
            SequenceKind::ImpactAnalysis => "impact_analysis",
            SequenceKind::SafeImpactAnalysis => "safe_impact_analysis",
        }
    }
}

/// Test targets to run, split by the exclude list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRunSelection {
    pub included: Vec<String>,
    pub excluded: Vec<String>,
}

/// Targets that did not pass, grouped by why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceFailureReport {
    pub execution_failures: Vec<String>,
    pub test_failures: Vec<String>,
    pub timeouts: Vec<String>,
    pub unexecuted: Vec<String>,
}

impl SequenceFailureReport {
    pub fn from_jobs(jobs: &[TestJob]) -> Self {
        let mut report = Self::default();
        for job in jobs {
            let bucket = match job.result {
                TestRunResult::AllTestsPass => continue,
                TestRunResult::FailedToExecute => &mut report.execution_failures,
                TestRunResult::TestFailures => &mut report.test_failures,
                TestRunResult::Timeout => &mut report.timeouts,
                TestRunResult::NotRun => &mut report.unexecuted,
            };
            bucket.push(job.target.clone());
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.execution_failures.is_empty()
            && self.test_failures.is_empty()
            && self.timeouts.is_empty()
            && self.unexecuted.is_empty()
    }
}

/// Outcome of one test run within a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub result: SequenceResult,
    pub jobs: Vec<TestJob>,
    pub failures: SequenceFailureReport,
    pub duration: Duration,
}

impl SequenceReport {
    pub fn new(outcome: RunOutcome, duration: Duration) -> Self {
        let failures = SequenceFailureReport::from_jobs(&outcome.jobs);
        Self {
            result: outcome.result,
            jobs: outcome.jobs,
            failures,
            duration,
        }
    }
}

/// Sent before a sequence runs any tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceStart {
    Regular {
        selection: TestRunSelection,
    },
    Seeded {
        selection: TestRunSelection,
    },
    ImpactAnalysis {
        selection: TestRunSelection,
        discarded: Vec<String>,
        drafted: Vec<String>,
    },
    SafeImpactAnalysis {
        selection: TestRunSelection,
        discarded: TestRunSelection,
        drafted: Vec<String>,
    },
}

/// Sent once a sequence has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEnd<'a> {
    Regular(&'a SequenceReport),
    Seeded(&'a SequenceReport),
    ImpactAnalysis(&'a SequenceReport),
    SafeImpactAnalysis {
        selected: &'a SequenceReport,
        discarded: &'a SequenceReport,
    },
}

/// Receives sequence progress. Every method defaults to doing nothing.
pub trait SequenceObserver: Send + Sync {
    fn on_sequence_start(&self, _start: &SequenceStart) {}

    /// Called as each test target completes, possibly from a worker thread.
    fn on_test_complete(&self, _job: &TestJob) {}

    fn on_sequence_end(&self, _end: &SequenceEnd<'_>) {}
}
