//! Test sequence orchestration.
//!
//! [`Runtime`] owns the dependency map, the test selector, the engine and the
//! run history, and drives the four kinds of test sequence:
//!
//! - regular: every non-excluded test target, no instrumentation
//! - seeded: every non-excluded test target instrumented, coverage rebuilt
//!   from scratch
//! - impact analysis: only the test targets affected by a change list
//! - safe impact analysis: affected targets instrumented, then the discarded
//!   targets run regularly within the remaining budget

pub mod persist;
pub mod report;

pub use report::{
    SequenceEnd, SequenceFailureReport, SequenceKind, SequenceObserver, SequenceReport, SequenceStart,
    TestRunSelection,
};

use crate::config::RuntimeConfig;
use crate::dependency::{
    ChangeDependencyList, ChangeList, ChangeListError, DependencyError, DynamicDependencyMap, GraphError,
    PersistedDataError, ResolutionError, TargetGraph, TestSelectorAndPrioritizer,
};
use crate::engine::{
    coverage_from_jobs, EngineError, JobCallback, JobLauncher, PooledTestEngine, RunOptions, SequenceResult,
    TestEngine, TestJob,
};
use crate::normalize::stable_id::sequence_id;
use crate::policy::{
    DynamicDependencyMapPolicy, ExecutionFailureDraftingPolicy, ExecutionFailurePolicy, IntegrityFailurePolicy,
    TestFailurePolicy, TestPrioritizationPolicy,
};
use crate::store::{self, StoreError, TestRunRow};
use crate::target::descriptor::{ProductionTargetDescriptor, TestTargetDescriptor};
use crate::target::{TargetError, TestTarget, TestTargetId};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced at the sequence boundary.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    ChangeList(#[from] ChangeListError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    PersistedData(#[from] PersistedDataError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-sequence options.
#[derive(Clone, Default)]
pub struct SequenceOptions {
    pub target_timeout: Option<Duration>,
    pub global_timeout: Option<Duration>,
    pub observer: Option<Arc<dyn SequenceObserver>>,
}

impl SequenceOptions {
    #[must_use]
    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SequenceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify_start(&self, start: &SequenceStart) {
        if let Some(observer) = &self.observer {
            observer.on_sequence_start(start);
        }
    }

    fn notify_end(&self, end: &SequenceEnd<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_sequence_end(end);
        }
    }

    fn job_callback(&self) -> Option<JobCallback> {
        self.observer.as_ref().map(|observer| {
            let observer = Arc::clone(observer);
            Arc::new(move |job: &TestJob| observer.on_test_complete(job)) as JobCallback
        })
    }
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// The test impact analysis runtime for one repository.
pub struct Runtime<E: TestEngine> {
    config: RuntimeConfig,
    map: DynamicDependencyMap,
    selector: TestSelectorAndPrioritizer,
    exclude_list: HashSet<TestTargetId>,
    engine: E,
    history: Option<Connection>,
    has_impact_analysis_data: bool,
}

impl<L: JobLauncher> Runtime<PooledTestEngine<L>> {
    /// Builds a runtime running jobs through a worker pool sized by the config.
    pub fn with_launcher(
        config: RuntimeConfig,
        production_targets: Vec<ProductionTargetDescriptor>,
        test_targets: Vec<TestTargetDescriptor>,
        launcher: L,
    ) -> Result<Self, RuntimeError> {
        let engine = PooledTestEngine::new(launcher, config.max_concurrency)?;
        Self::new(config, production_targets, test_targets, engine)
    }
}

impl<E: TestEngine> Runtime<E> {
    /// Builds the runtime and loads any persisted coverage.
    ///
    /// A missing coverage file means no impact analysis data yet. An
    /// unreadable one is fatal only under [`IntegrityFailurePolicy::Abort`].
    pub fn new(
        config: RuntimeConfig,
        production_targets: Vec<ProductionTargetDescriptor>,
        test_targets: Vec<TestTargetDescriptor>,
        engine: E,
    ) -> Result<Self, RuntimeError> {
        let map = DynamicDependencyMap::new(production_targets, test_targets)?;
        let graph = TargetGraph::from_edges(
            config
                .dependency_graph
                .iter()
                .map(|edge| (edge.target.as_str(), edge.depends_on.as_str())),
        )?;

        let mut exclude_list = HashSet::new();
        for name in &config.excluded_test_targets {
            match map.test_targets().get(name) {
                Some(target) => {
                    exclude_list.insert(target.id());
                }
                None => warn!(test_target = %name, "excluded test target is not in the build"),
            }
        }

        let history = match &config.history_dir {
            Some(dir) => {
                store::init_storage(dir)?;
                Some(store::open_connection(dir)?)
            }
            None => None,
        };

        let mut runtime = Self {
            config,
            map,
            selector: TestSelectorAndPrioritizer::new(graph),
            exclude_list,
            engine,
            history,
            has_impact_analysis_data: false,
        };
        runtime.load_coverage()?;
        Ok(runtime)
    }

    fn load_coverage(&mut self) -> Result<(), RuntimeError> {
        let abort = self.config.policies.integrity_failure == IntegrityFailurePolicy::Abort;
        let coverage = match persist::read_coverage_file(&self.config.tia_file) {
            Ok(Some(coverage)) => coverage,
            Ok(None) => {
                info!(path = %self.config.tia_file.display(), "no coverage data found, impact analysis unavailable until seeded");
                return Ok(());
            }
            Err(e) if abort => return Err(e.into()),
            Err(e) => {
                warn!(path = %self.config.tia_file.display(), error = %e, "ignoring unreadable coverage data");
                return Ok(());
            }
        };

        if coverage.is_empty() {
            return Ok(());
        }
        match self.map.replace_source_coverage(&coverage) {
            Ok(()) => {}
            Err(e) if abort => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "ignoring inconsistent coverage data");
                return Ok(());
            }
        }
        self.has_impact_analysis_data = true;
        info!(sources = coverage.num_sources(), "loaded coverage data");

        let not_covering: Vec<TestTargetId> = self
            .map
            .not_covering_test_targets()
            .iter()
            .map(|target| target.id())
            .collect();
        self.update_enumeration_cache(&not_covering)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn dynamic_dependency_map(&self) -> &DynamicDependencyMap {
        &self.map
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether coverage data is available for impact analysis.
    pub fn has_impact_analysis_data(&self) -> bool {
        self.has_impact_analysis_data
    }

    fn run_options(&self, target_timeout: Option<Duration>, global_timeout: Option<Duration>) -> RunOptions {
        let policies = self.config.policies;
        RunOptions {
            sharding: policies.test_sharding,
            execution_failure: policies.execution_failure,
            test_failure: policies.test_failure,
            output_capture: policies.target_output_capture,
            target_timeout,
            global_timeout,
        }
    }

    fn all_test_targets(&self) -> Vec<TestTargetId> {
        self.map.test_targets().iter().map(TestTarget::id).collect()
    }

    fn names(&self, ids: &[TestTargetId]) -> Vec<String> {
        self.map
            .resolve_test_targets(ids)
            .iter()
            .map(|target| target.name().to_string())
            .collect()
    }

    /// Splits targets into (included, excluded), keeping order.
    fn select_by_exclude_list(&self, ids: Vec<TestTargetId>) -> (Vec<TestTargetId>, Vec<TestTargetId>) {
        ids.into_iter().partition(|id| !self.exclude_list.contains(id))
    }

    fn selection(&self, included: &[TestTargetId], excluded: &[TestTargetId]) -> TestRunSelection {
        TestRunSelection {
            included: self.names(included),
            excluded: self.names(excluded),
        }
    }

    fn update_enumeration_cache(&self, ids: &[TestTargetId]) -> Result<(), RuntimeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let options = RunOptions {
            execution_failure: ExecutionFailurePolicy::Ignore,
            test_failure: TestFailurePolicy::Continue,
            ..self.run_options(None, None)
        };
        let targets = self.map.resolve_test_targets(ids);
        self.engine.update_enumeration_cache(&targets, &options)?;
        Ok(())
    }

    /// Enumerates the test targets that build any of the changed sources.
    fn enumerate_mutated_test_targets(&self, changes: &ChangeDependencyList) -> Result<(), RuntimeError> {
        let mutated: BTreeSet<TestTargetId> = changes
            .iter()
            .flat_map(|dependency| dependency.parent_test_targets())
            .collect();
        let mutated: Vec<TestTargetId> = mutated.into_iter().collect();
        self.update_enumeration_cache(&mutated)
    }

    /// Returns (selected, discarded) test targets for the changes.
    fn select_covering_test_targets(
        &self,
        changes: &ChangeDependencyList,
        prioritization: TestPrioritizationPolicy,
    ) -> (Vec<TestTargetId>, Vec<TestTargetId>) {
        let selected: Vec<TestTargetId> = self
            .selector
            .select_test_targets(&self.map, changes, prioritization)
            .iter()
            .map(|target| target.id())
            .collect();
        let chosen: HashSet<TestTargetId> = selected.iter().copied().collect();
        let discarded = self
            .all_test_targets()
            .into_iter()
            .filter(|id| !chosen.contains(id))
            .collect();
        (selected, discarded)
    }

    /// Test targets whose last recorded run failed to execute, if drafting is on.
    fn drafted_test_targets(&self, selected: &[TestTargetId]) -> Vec<TestTargetId> {
        if self.config.policies.execution_failure_drafting != ExecutionFailureDraftingPolicy::Always {
            return Vec::new();
        }
        let Some(conn) = &self.history else {
            return Vec::new();
        };
        let failed = match store::get_failed_to_execute_targets(conn) {
            Ok(failed) => failed,
            Err(e) => {
                warn!(error = %e, "could not read run history, drafting nothing");
                return Vec::new();
            }
        };
        failed
            .iter()
            .filter_map(|name| self.map.test_targets().get(name))
            .map(TestTarget::id)
            .filter(|id| !selected.contains(id) && !self.exclude_list.contains(id))
            .collect()
    }

    fn clear_dynamic_dependency_map_and_remove_existing_file(&mut self) -> Result<(), RuntimeError> {
        self.map.clear_all_source_coverage();
        self.has_impact_analysis_data = false;
        persist::remove_coverage_file(&self.config.tia_file)?;
        Ok(())
    }

    /// Merges the coverage of instrumented jobs into the map and persists it.
    fn update_and_serialize_dynamic_dependency_map(&mut self, jobs: &[TestJob]) -> Result<(), RuntimeError> {
        let repo_root = self.config.repo_root.to_string_lossy();
        let delta = coverage_from_jobs(jobs, &repo_root);
        if delta.is_empty() {
            debug!("no coverage produced, leaving coverage data untouched");
            return Ok(());
        }
        self.map.replace_source_coverage(&delta)?;
        let snapshot = self.map.export_source_coverage();
        persist::write_coverage_file(&self.config.tia_file, &snapshot)?;
        self.has_impact_analysis_data = !snapshot.is_empty();
        info!(
            updated = delta.num_sources(),
            total = snapshot.num_sources(),
            path = %self.config.tia_file.display(),
            "persisted coverage data"
        );
        Ok(())
    }

    fn record_history(&mut self, kind: SequenceKind, started_at: Duration, result: SequenceResult, jobs: &[&TestJob]) {
        let Some(conn) = self.history.as_mut() else {
            return;
        };
        if let Err(e) = write_history(conn, kind, started_at, result, jobs) {
            warn!(sequence = kind.as_str(), error = %e, "failed to record run history");
        }
    }

    /// Runs every non-excluded test target without instrumentation.
    pub fn regular_test_sequence(&mut self, options: &SequenceOptions) -> Result<SequenceReport, RuntimeError> {
        let started = Instant::now();
        let started_at = unix_now();
        let (included, excluded) = self.select_by_exclude_list(self.all_test_targets());
        options.notify_start(&SequenceStart::Regular {
            selection: self.selection(&included, &excluded),
        });

        let run_options = self.run_options(options.target_timeout, options.global_timeout);
        let targets = self.map.resolve_test_targets(&included);
        let outcome = self
            .engine
            .regular_run(&targets, &run_options, options.job_callback())?;
        let report = SequenceReport::new(outcome, started.elapsed());

        let jobs: Vec<&TestJob> = report.jobs.iter().collect();
        self.record_history(SequenceKind::Regular, started_at, report.result, &jobs);
        options.notify_end(&SequenceEnd::Regular(&report));
        Ok(report)
    }

    /// Runs every non-excluded test target instrumented and rebuilds the
    /// coverage data from the result.
    pub fn seeded_test_sequence(&mut self, options: &SequenceOptions) -> Result<SequenceReport, RuntimeError> {
        let started = Instant::now();
        let started_at = unix_now();
        let (included, excluded) = self.select_by_exclude_list(self.all_test_targets());
        options.notify_start(&SequenceStart::Seeded {
            selection: self.selection(&included, &excluded),
        });

        let run_options = self.run_options(options.target_timeout, options.global_timeout);
        let targets = self.map.resolve_test_targets(&included);
        let outcome = self.engine.instrumented_run(
            &targets,
            &run_options,
            IntegrityFailurePolicy::Continue,
            options.job_callback(),
        )?;

        self.clear_dynamic_dependency_map_and_remove_existing_file()?;
        self.update_and_serialize_dynamic_dependency_map(&outcome.jobs)?;
        let report = SequenceReport::new(outcome, started.elapsed());

        let jobs: Vec<&TestJob> = report.jobs.iter().collect();
        self.record_history(SequenceKind::Seeded, started_at, report.result, &jobs);
        options.notify_end(&SequenceEnd::Seeded(&report));
        Ok(report)
    }

    /// Runs the test targets affected by a change list.
    ///
    /// With [`DynamicDependencyMapPolicy::Update`] the targets run
    /// instrumented and their coverage is persisted.
    pub fn impact_analysis_test_sequence(
        &mut self,
        change_list: &ChangeList,
        prioritization: TestPrioritizationPolicy,
        map_policy: DynamicDependencyMapPolicy,
        options: &SequenceOptions,
    ) -> Result<SequenceReport, RuntimeError> {
        let started = Instant::now();
        let started_at = unix_now();
        let changes = self.map.apply_and_resolve_change_list(change_list)?;
        self.enumerate_mutated_test_targets(&changes)?;

        let (mut selected, discarded) = self.select_covering_test_targets(&changes, prioritization);
        let drafted = self.drafted_test_targets(&selected);
        selected.extend(drafted.iter().copied());
        let discarded: Vec<TestTargetId> = discarded
            .into_iter()
            .filter(|id| !drafted.contains(id))
            .collect();
        let (included, excluded) = self.select_by_exclude_list(selected);
        info!(
            changes = change_list.len(),
            included = included.len(),
            excluded = excluded.len(),
            discarded = discarded.len(),
            drafted = drafted.len(),
            "impact analysis selection"
        );
        options.notify_start(&SequenceStart::ImpactAnalysis {
            selection: self.selection(&included, &excluded),
            discarded: self.names(&discarded),
            drafted: self.names(&drafted),
        });

        let run_options = self.run_options(options.target_timeout, options.global_timeout);
        let targets = self.map.resolve_test_targets(&included);
        let outcome = match map_policy {
            DynamicDependencyMapPolicy::Update => self.engine.instrumented_run(
                &targets,
                &run_options,
                IntegrityFailurePolicy::Continue,
                options.job_callback(),
            )?,
            DynamicDependencyMapPolicy::Discard => {
                self.engine
                    .regular_run(&targets, &run_options, options.job_callback())?
            }
        };

        if map_policy == DynamicDependencyMapPolicy::Update {
            self.update_and_serialize_dynamic_dependency_map(&outcome.jobs)?;
        }
        let report = SequenceReport::new(outcome, started.elapsed());

        let jobs: Vec<&TestJob> = report.jobs.iter().collect();
        self.record_history(SequenceKind::ImpactAnalysis, started_at, report.result, &jobs);
        options.notify_end(&SequenceEnd::ImpactAnalysis(&report));
        Ok(report)
    }

    /// Runs the affected test targets instrumented, then the discarded ones
    /// regularly within what is left of the global timeout.
    ///
    /// Returns the (selected, discarded) reports.
    pub fn safe_impact_analysis_test_sequence(
        &mut self,
        change_list: &ChangeList,
        prioritization: TestPrioritizationPolicy,
        options: &SequenceOptions,
    ) -> Result<(SequenceReport, SequenceReport), RuntimeError> {
        let started = Instant::now();
        let started_at = unix_now();
        let changes = self.map.apply_and_resolve_change_list(change_list)?;
        self.enumerate_mutated_test_targets(&changes)?;

        let (mut selected, discarded) = self.select_covering_test_targets(&changes, prioritization);
        let drafted = self.drafted_test_targets(&selected);
        selected.extend(drafted.iter().copied());
        let discarded: Vec<TestTargetId> = discarded
            .into_iter()
            .filter(|id| !drafted.contains(id))
            .collect();
        let (included, excluded) = self.select_by_exclude_list(selected);
        let (discarded_included, discarded_excluded) = self.select_by_exclude_list(discarded);
        options.notify_start(&SequenceStart::SafeImpactAnalysis {
            selection: self.selection(&included, &excluded),
            discarded: self.selection(&discarded_included, &discarded_excluded),
            drafted: self.names(&drafted),
        });

        let run_options = self.run_options(options.target_timeout, options.global_timeout);
        let targets = self.map.resolve_test_targets(&included);
        let selected_outcome = self.engine.instrumented_run(
            &targets,
            &run_options,
            IntegrityFailurePolicy::Continue,
            options.job_callback(),
        )?;
        let selected_duration = started.elapsed();

        let remaining = options
            .global_timeout
            .map(|budget| budget.saturating_sub(started.elapsed()));
        let run_options = self.run_options(options.target_timeout, remaining);
        let targets = self.map.resolve_test_targets(&discarded_included);
        let discarded_started = Instant::now();
        let discarded_outcome = self
            .engine
            .regular_run(&targets, &run_options, options.job_callback())?;
        let discarded_duration = discarded_started.elapsed();

        self.update_and_serialize_dynamic_dependency_map(&selected_outcome.jobs)?;
        let selected_report = SequenceReport::new(selected_outcome, selected_duration);
        let discarded_report = SequenceReport::new(discarded_outcome, discarded_duration);

        let jobs: Vec<&TestJob> = selected_report
            .jobs
            .iter()
            .chain(&discarded_report.jobs)
            .collect();
        let result = selected_report.result.combine(discarded_report.result);
        self.record_history(SequenceKind::SafeImpactAnalysis, started_at, result, &jobs);
        options.notify_end(&SequenceEnd::SafeImpactAnalysis {
            selected: &selected_report,
            discarded: &discarded_report,
        });
        Ok((selected_report, discarded_report))
    }
}

fn write_history(
    conn: &mut Connection,
    kind: SequenceKind,
    started_at: Duration,
    result: SequenceResult,
    jobs: &[&TestJob],
) -> Result<(), StoreError> {
    let id = sequence_id(kind.as_str(), started_at.as_nanos());
    let rows: Vec<TestRunRow> = jobs
        .iter()
        .map(|job| TestRunRow {
            target: job.target.clone(),
            result: job.result.as_str().to_string(),
            duration_ms: millis(job.duration),
        })
        .collect();
    let tx = conn.transaction()?;
    store::insert_sequence(&tx, &id, kind.as_str(), millis(started_at))?;
    store::insert_test_runs(&tx, &id, &rows)?;
    store::complete_sequence(&tx, &id, result.as_str(), millis(unix_now()))?;
    tx.commit()?;
    Ok(())
}
