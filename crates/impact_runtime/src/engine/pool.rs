//! Worker pool test engine.
//!
//! Dispatches jobs to a [`JobLauncher`] on a dedicated tokio runtime with at
//! most `max_concurrency` jobs in flight. The global timeout is a hard
//! deadline: nothing is dispatched after it and in-flight jobs are cancelled
//! when it passes.

use super::launcher::{JobLauncher, JobMode, JobOutput, JobSpec, LaunchError, TestOutcome};
use super::{EngineError, JobCallback, RunOptions, RunOutcome, SequenceResult, TestEngine, TestJob, TestRunResult};
use crate::policy::{
    ExecutionFailurePolicy, IntegrityFailurePolicy, TestFailurePolicy, TestShardingPolicy,
};
use crate::target::TestTarget;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A test engine backed by a bounded worker pool.
pub struct PooledTestEngine<L: JobLauncher> {
    launcher: Arc<L>,
    runtime: tokio::runtime::Runtime,
    max_concurrency: usize,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl<L: JobLauncher> PooledTestEngine<L> {
    /// Creates the engine. `None` or zero concurrency uses the available parallelism.
    pub fn new(launcher: L, max_concurrency: Option<usize>) -> Result<Self, EngineError> {
        let max_concurrency = max_concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(default_concurrency);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(max_concurrency)
            .thread_name("impact-worker")
            .enable_time()
            .build()
            .map_err(EngineError::RuntimeInit)?;
        Ok(Self {
            launcher: Arc::new(launcher),
            runtime,
            max_concurrency,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn run(
        &self,
        targets: &[&TestTarget],
        mode: JobMode,
        options: &RunOptions,
        integrity: IntegrityFailurePolicy,
        on_complete: Option<JobCallback>,
    ) -> RunOutcome {
        let mut work = Vec::new();
        let mut shard_counts = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            let spec = JobSpec::new(target, mode, options.output_capture);
            let shards = match options.sharding {
                TestShardingPolicy::Always => target.shards(),
                TestShardingPolicy::Never => 1,
            };
            if shards > 1 {
                work.extend((0..shards).map(|shard| (index, spec.clone().with_shard(shard, shards))));
            } else {
                work.push((index, spec));
            }
            shard_counts.push(shards);
        }

        info!(targets = targets.len(), jobs = work.len(), ?mode, "starting test run");
        let mut tracker = Tracker::new(targets, shard_counts, on_complete);
        let dispatch = Dispatch {
            launcher: Arc::clone(&self.launcher),
            mode,
            options: *options,
            integrity,
            max_concurrency: self.max_concurrency,
        };
        let timed_out = self.runtime.block_on(dispatch.run(work, &mut tracker));

        let halted = tracker.halted;
        let jobs = tracker.finish();
        let result = if timed_out {
            SequenceResult::Timeout
        } else if halted || jobs.iter().any(|job| is_failure(job.result, options.execution_failure)) {
            SequenceResult::Failure
        } else {
            SequenceResult::Success
        };
        info!(targets = jobs.len(), result = result.as_str(), "test run complete");
        RunOutcome { result, jobs }
    }
}

fn is_failure(result: TestRunResult, execution_failure: ExecutionFailurePolicy) -> bool {
    match result {
        TestRunResult::FailedToExecute => execution_failure != ExecutionFailurePolicy::Ignore,
        TestRunResult::TestFailures | TestRunResult::Timeout => true,
        TestRunResult::NotRun | TestRunResult::AllTestsPass => false,
    }
}

impl<L: JobLauncher> TestEngine for PooledTestEngine<L> {
    fn regular_run(
        &self,
        targets: &[&TestTarget],
        options: &RunOptions,
        on_complete: Option<JobCallback>,
    ) -> Result<RunOutcome, EngineError> {
        Ok(self.run(targets, JobMode::Regular, options, IntegrityFailurePolicy::Continue, on_complete))
    }

    fn instrumented_run(
        &self,
        targets: &[&TestTarget],
        options: &RunOptions,
        integrity: IntegrityFailurePolicy,
        on_complete: Option<JobCallback>,
    ) -> Result<RunOutcome, EngineError> {
        Ok(self.run(targets, JobMode::Instrumented, options, integrity, on_complete))
    }

    fn update_enumeration_cache(&self, targets: &[&TestTarget], options: &RunOptions) -> Result<(), EngineError> {
        if targets.is_empty() {
            return Ok(());
        }
        let options = RunOptions {
            sharding: TestShardingPolicy::Never,
            execution_failure: ExecutionFailurePolicy::Continue,
            test_failure: TestFailurePolicy::Continue,
            ..*options
        };
        let outcome = self.run(targets, JobMode::Enumerate, &options, IntegrityFailurePolicy::Continue, None);
        debug!(targets = targets.len(), result = outcome.result.as_str(), "updated enumeration cache");
        Ok(())
    }
}

/// Output of one dispatched job; `None` when the per-target timeout fired.
struct ShardRun {
    duration: Duration,
    output: Option<Result<JobOutput, LaunchError>>,
}

struct Dispatch<L> {
    launcher: Arc<L>,
    mode: JobMode,
    options: RunOptions,
    integrity: IntegrityFailurePolicy,
    max_concurrency: usize,
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<L: JobLauncher> Dispatch<L> {
    /// Runs all work items, returning whether the global deadline was hit.
    async fn run(self, work: Vec<(usize, JobSpec)>, tracker: &mut Tracker) -> bool {
        let deadline = self.options.global_timeout.map(|budget| Instant::now() + budget);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut in_flight: JoinSet<ShardRun> = JoinSet::new();
        // A permit is released only once its job's result is recorded.
        let mut task_targets: HashMap<Id, (usize, OwnedSemaphorePermit)> = HashMap::new();
        let mut pending = work.into_iter().peekable();
        let mut timed_out = false;

        while pending.peek().is_some() && !tracker.halted {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                timed_out = true;
                break;
            }
            tokio::select! {
                biased;
                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    self.complete(joined, &mut task_targets, tracker);
                }
                () = deadline_reached(deadline) => {
                    timed_out = true;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let (Ok(permit), Some((index, spec))) = (permit, pending.next()) else {
                        break;
                    };
                    tracker.dispatched(index);
                    let launcher = Arc::clone(&self.launcher);
                    let target_timeout = self.options.target_timeout;
                    let handle = in_flight.spawn(async move {
                        let started = Instant::now();
                        let launched = launcher.launch(spec);
                        let output = match target_timeout {
                            Some(limit) => tokio::time::timeout(limit, launched).await.ok(),
                            None => Some(launched.await),
                        };
                        ShardRun { duration: started.elapsed(), output }
                    });
                    task_targets.insert(handle.id(), (index, permit));
                }
            }
            if timed_out {
                break;
            }
        }

        if timed_out {
            warn!(in_flight = in_flight.len(), "global timeout reached, cancelling in-flight jobs");
            in_flight.abort_all();
        }
        while !in_flight.is_empty() {
            tokio::select! {
                biased;
                Some(joined) = in_flight.join_next_with_id() => {
                    self.complete(joined, &mut task_targets, tracker);
                }
                () = deadline_reached(deadline), if !timed_out => {
                    timed_out = true;
                    warn!(in_flight = in_flight.len(), "global timeout reached, cancelling in-flight jobs");
                    in_flight.abort_all();
                }
                else => break,
            }
        }
        timed_out
    }

    fn complete(
        &self,
        joined: Result<(Id, ShardRun), JoinError>,
        task_targets: &mut HashMap<Id, (usize, OwnedSemaphorePermit)>,
        tracker: &mut Tracker,
    ) {
        match joined {
            Ok((id, run)) => {
                if let Some((index, _permit)) = task_targets.remove(&id) {
                    let halt = self.record(index, run, tracker);
                    tracker.halted |= halt;
                }
            }
            Err(e) if e.is_cancelled() => {
                task_targets.remove(&e.id());
            }
            Err(e) => {
                if let Some((index, _permit)) = task_targets.remove(&e.id()) {
                    warn!(test_target = %tracker.name(index), "job worker panicked");
                    tracker.record(index, TestRunResult::FailedToExecute, Duration::ZERO, None);
                    tracker.halted |= self.options.execution_failure == ExecutionFailurePolicy::Abort;
                }
            }
        }
    }

    /// Records one shard run, returning whether dispatch should halt.
    fn record(&self, index: usize, run: ShardRun, tracker: &mut Tracker) -> bool {
        let target = tracker.name(index).to_string();
        let Some(output) = run.output else {
            warn!(test_target = %target, duration_ms = run.duration.as_millis(), "test target timed out");
            tracker.record(index, TestRunResult::Timeout, run.duration, None);
            return false;
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(test_target = %target, error = %e, "test target failed to execute");
                tracker.record(index, TestRunResult::FailedToExecute, run.duration, None);
                return self.options.execution_failure == ExecutionFailurePolicy::Abort;
            }
        };

        let mut halt = false;
        if self.mode == JobMode::Instrumented && output.coverage.is_none() {
            warn!(test_target = %target, "instrumented run produced no coverage");
            halt |= self.integrity == IntegrityFailurePolicy::Abort;
        }
        let result = match output.outcome {
            TestOutcome::AllTestsPass => TestRunResult::AllTestsPass,
            TestOutcome::TestFailures => {
                halt |= self.options.test_failure == TestFailurePolicy::Abort;
                TestRunResult::TestFailures
            }
        };
        let std_output = output
            .std_output
            .filter(|_| self.options.output_capture.captures_stdout());
        tracker.record(
            index,
            result,
            run.duration,
            Some(ShardOutput { coverage: output.coverage, std_output }),
        );
        halt
    }
}

struct ShardOutput {
    coverage: Option<Vec<String>>,
    std_output: Option<String>,
}

/// Worst result wins when merging shards.
fn severity(result: TestRunResult) -> u8 {
    match result {
        TestRunResult::AllTestsPass => 0,
        TestRunResult::NotRun => 1,
        TestRunResult::TestFailures => 2,
        TestRunResult::Timeout => 3,
        TestRunResult::FailedToExecute => 4,
    }
}

fn merge(current: Option<TestRunResult>, next: TestRunResult) -> TestRunResult {
    match current {
        Some(current) if severity(current) >= severity(next) => current,
        _ => next,
    }
}

struct Slot {
    shards: u32,
    dispatched: u32,
    recorded: u32,
    result: Option<TestRunResult>,
}

/// Per-target bookkeeping for a run.
struct Tracker {
    jobs: Vec<TestJob>,
    slots: Vec<Slot>,
    on_complete: Option<JobCallback>,
    halted: bool,
}

impl Tracker {
    fn new(targets: &[&TestTarget], shard_counts: Vec<u32>, on_complete: Option<JobCallback>) -> Self {
        Self {
            jobs: targets.iter().map(|target| TestJob::not_run(target.name())).collect(),
            slots: shard_counts
                .into_iter()
                .map(|shards| Slot {
                    shards,
                    dispatched: 0,
                    recorded: 0,
                    result: None,
                })
                .collect(),
            on_complete,
            halted: false,
        }
    }

    fn name(&self, index: usize) -> &str {
        &self.jobs[index].target
    }

    fn dispatched(&mut self, index: usize) {
        self.slots[index].dispatched += 1;
    }

    fn record(&mut self, index: usize, result: TestRunResult, duration: Duration, output: Option<ShardOutput>) {
        let slot = &mut self.slots[index];
        let job = &mut self.jobs[index];
        slot.recorded += 1;
        slot.result = Some(merge(slot.result, result));
        job.duration = job.duration.max(duration);
        if let Some(output) = output {
            if let Some(coverage) = output.coverage {
                job.coverage.get_or_insert_with(Vec::new).extend(coverage);
            }
            if let Some(std_output) = output.std_output {
                job.std_output.get_or_insert_with(String::new).push_str(&std_output);
            }
        }
        if slot.recorded == slot.shards {
            self.finalize(index);
        }
    }

    fn finalize(&mut self, index: usize) {
        let slot = &self.slots[index];
        let job = &mut self.jobs[index];
        if let Some(result) = slot.result {
            job.result = result;
        }
        if slot.shards > 1 {
            if let Some(coverage) = job.coverage.as_mut() {
                coverage.sort();
                coverage.dedup();
            }
        }
        if let Some(callback) = &self.on_complete {
            callback(job);
        }
    }

    /// Resolves targets that never completed: aborted shards are timeouts,
    /// shards never dispatched are not run.
    fn finish(mut self) -> Vec<TestJob> {
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            if slot.recorded == slot.shards {
                continue;
            }
            if slot.dispatched == 0 && slot.recorded == 0 {
                continue;
            }
            let mut result = slot.result;
            if slot.dispatched > slot.recorded {
                result = Some(merge(result, TestRunResult::Timeout));
            }
            if slot.dispatched < slot.shards {
                result = Some(merge(result, TestRunResult::NotRun));
            }
            self.slots[index].result = result;
            self.finalize(index);
        }
        self.jobs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::launcher::LaunchFuture;
    use crate::policy::TargetOutputCapture;
    use crate::target::descriptor::{BuildTargetDescriptor, TestTargetDescriptor};
    use crate::target::TestTargetList;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Behaviour {
        Pass,
        Fail,
        Error,
        Sleep(Duration),
        Cover(Vec<&'static str>),
    }

    #[derive(Default)]
    struct FakeLauncher {
        behaviours: HashMap<String, Behaviour>,
        launched: Mutex<Vec<JobSpec>>,
    }

    impl FakeLauncher {
        fn with(mut self, target: &str, behaviour: Behaviour) -> Self {
            self.behaviours.insert(target.to_string(), behaviour);
            self
        }

        fn launched(&self) -> Vec<JobSpec> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl JobLauncher for FakeLauncher {
        fn launch(&self, spec: JobSpec) -> LaunchFuture {
            self.launched.lock().unwrap().push(spec.clone());
            let behaviour = self
                .behaviours
                .get(&spec.target)
                .cloned()
                .unwrap_or(Behaviour::Pass);
            Box::pin(async move {
                let mut output = match behaviour {
                    Behaviour::Pass => JobOutput::passed(),
                    Behaviour::Fail => JobOutput::failed(),
                    Behaviour::Error => {
                        return Err(LaunchError::Spawn {
                            target: spec.target,
                            message: "binary not found".into(),
                        })
                    }
                    Behaviour::Sleep(duration) => {
                        tokio::time::sleep(duration).await;
                        JobOutput::passed()
                    }
                    Behaviour::Cover(sources) => JobOutput::passed().with_coverage(sources),
                };
                if let Some(shard) = spec.shard {
                    output = output.with_coverage([format!("shard{}.cpp", shard.index)]);
                }
                Ok(output.with_std_output(format!("[{}]", spec.target)))
            })
        }
    }

    fn targets(names: &[&str]) -> TestTargetList {
        TestTargetList::from_descriptors(
            names
                .iter()
                .map(|name| TestTargetDescriptor::from(BuildTargetDescriptor::new(*name)))
                .collect(),
        )
        .unwrap()
    }

    fn engine(launcher: FakeLauncher, concurrency: usize) -> PooledTestEngine<FakeLauncher> {
        PooledTestEngine::new(launcher, Some(concurrency)).unwrap()
    }

    fn results(outcome: &RunOutcome) -> Vec<(&str, TestRunResult)> {
        outcome
            .jobs
            .iter()
            .map(|job| (job.target.as_str(), job.result))
            .collect()
    }

    #[test]
    fn all_pass_reports_jobs_in_request_order() {
        let list = targets(&["A", "B", "C"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completed);
        let callback: JobCallback = Arc::new(move |_job| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let engine = engine(FakeLauncher::default(), 2);
        let outcome = engine
            .regular_run(&selected, &RunOptions::default(), Some(callback))
            .unwrap();

        assert_eq!(outcome.result, SequenceResult::Success);
        assert_eq!(
            results(&outcome),
            vec![
                ("A", TestRunResult::AllTestsPass),
                ("B", TestRunResult::AllTestsPass),
                ("C", TestRunResult::AllTestsPass),
            ]
        );
        assert_eq!(completed.load(Ordering::SeqCst), 3);
        assert!(engine.launcher.launched().iter().all(|spec| spec.mode == JobMode::Regular));
    }

    #[test]
    fn test_failure_abort_stops_dispatch() {
        let list = targets(&["A", "B", "C"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default().with("A", Behaviour::Fail), 1);
        let options = RunOptions {
            test_failure: TestFailurePolicy::Abort,
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &options, None).unwrap();

        assert_eq!(outcome.result, SequenceResult::Failure);
        assert_eq!(
            results(&outcome),
            vec![
                ("A", TestRunResult::TestFailures),
                ("B", TestRunResult::NotRun),
                ("C", TestRunResult::NotRun),
            ]
        );
        assert_eq!(engine.launcher.launched().len(), 1);
    }

    #[test]
    fn test_failure_continue_runs_everything() {
        let list = targets(&["A", "B"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default().with("A", Behaviour::Fail), 1);
        let options = RunOptions {
            test_failure: TestFailurePolicy::Continue,
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &options, None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Failure);
        assert_eq!(outcome.jobs[1].result, TestRunResult::AllTestsPass);
    }

    #[test]
    fn execution_failure_policies() {
        let list = targets(&["A", "B"]);
        let selected: Vec<&TestTarget> = list.iter().collect();

        let ignore = RunOptions {
            execution_failure: ExecutionFailurePolicy::Ignore,
            ..RunOptions::default()
        };
        let engine = engine(FakeLauncher::default().with("A", Behaviour::Error), 1);
        let outcome = engine.regular_run(&selected, &ignore, None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Success);
        assert_eq!(outcome.jobs[0].result, TestRunResult::FailedToExecute);

        let outcome = engine.regular_run(&selected, &RunOptions::default(), None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Failure);
        assert_eq!(outcome.jobs[1].result, TestRunResult::AllTestsPass);

        let abort = RunOptions {
            execution_failure: ExecutionFailurePolicy::Abort,
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &abort, None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Failure);
        assert_eq!(outcome.jobs[1].result, TestRunResult::NotRun);
    }

    #[test]
    fn target_timeout_marks_job_timed_out() {
        let list = targets(&["Slow", "Fast"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(
            FakeLauncher::default().with("Slow", Behaviour::Sleep(Duration::from_secs(5))),
            2,
        );
        let options = RunOptions {
            target_timeout: Some(Duration::from_millis(50)),
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &options, None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Failure);
        assert_eq!(
            results(&outcome),
            vec![("Slow", TestRunResult::Timeout), ("Fast", TestRunResult::AllTestsPass)]
        );
    }

    #[test]
    fn global_timeout_cancels_in_flight_and_skips_pending() {
        let list = targets(&["A", "B", "C"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let slow = Behaviour::Sleep(Duration::from_millis(300));
        let engine = engine(
            FakeLauncher::default()
                .with("A", slow.clone())
                .with("B", slow.clone())
                .with("C", slow),
            1,
        );
        let options = RunOptions {
            global_timeout: Some(Duration::from_millis(450)),
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &options, None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Timeout);
        assert_eq!(
            results(&outcome),
            vec![
                ("A", TestRunResult::AllTestsPass),
                ("B", TestRunResult::Timeout),
                ("C", TestRunResult::NotRun),
            ]
        );
    }

    #[test]
    fn zero_global_budget_runs_nothing() {
        let list = targets(&["A", "B"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default(), 2);
        let options = RunOptions {
            global_timeout: Some(Duration::ZERO),
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &options, None).unwrap();
        assert_eq!(outcome.result, SequenceResult::Timeout);
        assert!(outcome.jobs.iter().all(|job| job.result == TestRunResult::NotRun));
        assert!(engine.launcher.launched().is_empty());
    }

    #[test]
    fn instrumented_run_collects_coverage() {
        let list = targets(&["A"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default().with("A", Behaviour::Cover(vec!["a.cpp"])), 1);
        let outcome = engine
            .instrumented_run(&selected, &RunOptions::default(), IntegrityFailurePolicy::Abort, None)
            .unwrap();
        assert_eq!(outcome.result, SequenceResult::Success);
        assert_eq!(outcome.jobs[0].coverage, Some(vec!["a.cpp".to_string()]));
        assert_eq!(engine.launcher.launched()[0].mode, JobMode::Instrumented);
    }

    #[test]
    fn missing_coverage_is_an_integrity_failure() {
        let list = targets(&["A", "B"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default(), 1);

        let outcome = engine
            .instrumented_run(&selected, &RunOptions::default(), IntegrityFailurePolicy::Abort, None)
            .unwrap();
        assert_eq!(outcome.result, SequenceResult::Failure);
        assert_eq!(outcome.jobs[1].result, TestRunResult::NotRun);

        let outcome = engine
            .instrumented_run(&selected, &RunOptions::default(), IntegrityFailurePolicy::Continue, None)
            .unwrap();
        assert_eq!(outcome.result, SequenceResult::Success);
    }

    #[test]
    fn sharded_target_merges_shard_results() {
        let mut descriptor = TestTargetDescriptor::from(BuildTargetDescriptor::new("Big"));
        descriptor.shards = 3;
        let list = TestTargetList::from_descriptors(vec![descriptor]).unwrap();
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default(), 3);
        let options = RunOptions {
            sharding: TestShardingPolicy::Always,
            ..RunOptions::default()
        };
        let outcome = engine
            .instrumented_run(&selected, &options, IntegrityFailurePolicy::Abort, None)
            .unwrap();

        let mut shards: Vec<u32> = engine
            .launcher
            .launched()
            .iter()
            .map(|spec| spec.shard.unwrap().index)
            .collect();
        shards.sort_unstable();
        assert_eq!(shards, vec![0, 1, 2]);
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].result, TestRunResult::AllTestsPass);
        assert_eq!(
            outcome.jobs[0].coverage,
            Some(vec!["shard0.cpp".to_string(), "shard1.cpp".to_string(), "shard2.cpp".to_string()])
        );
    }

    #[test]
    fn sharding_never_dispatches_whole_target() {
        let mut descriptor = TestTargetDescriptor::from(BuildTargetDescriptor::new("Big"));
        descriptor.shards = 3;
        let list = TestTargetList::from_descriptors(vec![descriptor]).unwrap();
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default(), 3);
        engine.regular_run(&selected, &RunOptions::default(), None).unwrap();
        let launched = engine.launcher.launched();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].shard.is_none());
    }

    #[test]
    fn stdout_kept_only_when_captured() {
        let list = targets(&["A"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default(), 1);

        let outcome = engine.regular_run(&selected, &RunOptions::default(), None).unwrap();
        assert_eq!(outcome.jobs[0].std_output, None);

        let options = RunOptions {
            output_capture: TargetOutputCapture::StdOut,
            ..RunOptions::default()
        };
        let outcome = engine.regular_run(&selected, &options, None).unwrap();
        assert_eq!(outcome.jobs[0].std_output.as_deref(), Some("[A]"));
        assert_eq!(engine.launcher.launched()[1].output_capture, TargetOutputCapture::StdOut);
    }

    #[test]
    fn enumeration_uses_enumerate_jobs() {
        let list = targets(&["A", "B"]);
        let selected: Vec<&TestTarget> = list.iter().collect();
        let engine = engine(FakeLauncher::default().with("A", Behaviour::Error), 1);
        engine
            .update_enumeration_cache(&selected, &RunOptions::default())
            .unwrap();
        let launched = engine.launcher.launched();
        assert_eq!(launched.len(), 2);
        assert!(launched.iter().all(|spec| spec.mode == JobMode::Enumerate));
    }
}
