//! Dynamic dependency map.
//!
//! Relates every source file of the repository to the build targets that
//! compile it and to the test targets known to cover it. Coverage arrives in
//! deltas and is merged in place; the reverse build target → covering test
//! target index is updated in the same call as the forward map.

use super::change_list::ChangeList;
use super::coverage::SourceCoveringTestsList;
use super::source::{ChangeDependencyList, SourceDependency};
use super::{DependencyError, ResolutionError};
use crate::normalize::RepoPath;
use crate::target::descriptor::{ProductionTargetDescriptor, TestTargetDescriptor};
use crate::target::{
    BuildTarget, BuildTargetId, HasBuildTarget, ProductionTarget, ProductionTargetList, Target,
    TargetError, TestTarget, TestTargetId, TestTargetList,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

#[derive(Debug, Default, Clone)]
struct DependencyData {
    parent_targets: BTreeSet<BuildTargetId>,
    covering_test_targets: BTreeSet<TestTargetId>,
}

impl DependencyData {
    fn is_empty(&self) -> bool {
        self.parent_targets.is_empty() && self.covering_test_targets.is_empty()
    }
}

/// The repository source tree and its relation to build targets and coverage.
pub struct DynamicDependencyMap {
    production_targets: ProductionTargetList,
    test_targets: TestTargetList,
    sources: HashMap<RepoPath, DependencyData>,
    build_target_coverage: HashMap<BuildTargetId, BTreeSet<TestTargetId>>,
    target_sources: HashMap<BuildTargetId, Vec<RepoPath>>,
    autogen_input_to_outputs: HashMap<RepoPath, Vec<RepoPath>>,
}

impl DynamicDependencyMap {
    /// Builds the map from target descriptors with empty coverage.
    pub fn new(
        production_descriptors: Vec<ProductionTargetDescriptor>,
        test_descriptors: Vec<TestTargetDescriptor>,
    ) -> Result<Self, TargetError> {
        let production_targets = ProductionTargetList::from_descriptors(production_descriptors)?;
        let test_targets = TestTargetList::from_descriptors(test_descriptors)?;

        if let Some(clash) = test_targets
            .iter()
            .find(|target| production_targets.contains(target.name()))
        {
            return Err(TargetError::Duplicate(clash.name().to_string()));
        }

        let mut map = Self {
            production_targets,
            test_targets,
            sources: HashMap::new(),
            build_target_coverage: HashMap::new(),
            target_sources: HashMap::new(),
            autogen_input_to_outputs: HashMap::new(),
        };

        let targets: Vec<(BuildTargetId, BuildTarget)> = map
            .production_targets
            .iter()
            .map(|t| (BuildTargetId::Production(t.id()), t.build_target().clone()))
            .chain(
                map.test_targets
                    .iter()
                    .map(|t| (BuildTargetId::Test(t.id()), t.build_target().clone())),
            )
            .collect();
        for (id, target) in &targets {
            map.register_sources(*id, target);
        }

        info!(
            targets = map.num_targets(),
            sources = map.num_sources(),
            autogen_inputs = map.autogen_input_to_outputs.len(),
            "dependency map constructed"
        );
        Ok(map)
    }

    fn register_sources(&mut self, id: BuildTargetId, target: &BuildTarget) {
        let mut compiled = Vec::new();
        for source in target.compiled_sources() {
            self.sources
                .entry(source.clone())
                .or_default()
                .parent_targets
                .insert(id);
            compiled.push(source.clone());
        }
        for pair in &target.sources().autogen_sources {
            let outputs = self
                .autogen_input_to_outputs
                .entry(pair.input.clone())
                .or_default();
            for output in &pair.outputs {
                if !outputs.contains(output) {
                    outputs.push(output.clone());
                }
            }
        }
        self.target_sources.insert(id, compiled);
    }

    /// Total number of production and test targets.
    pub fn num_targets(&self) -> usize {
        self.production_targets.len() + self.test_targets.len()
    }

    /// Total number of unique sources, autogen outputs included.
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn production_targets(&self) -> &ProductionTargetList {
        &self.production_targets
    }

    pub fn test_targets(&self) -> &TestTargetList {
        &self.test_targets
    }

    pub fn build_target(&self, name: &str) -> Option<&BuildTarget> {
        self.target(name).map(|target| target.build_target())
    }

    pub fn build_target_or_err(&self, name: &str) -> Result<&BuildTarget, TargetError> {
        self.build_target(name)
            .ok_or_else(|| TargetError::NotFound(name.to_string()))
    }

    /// Looks up a target and returns its specialized view.
    pub fn target(&self, name: &str) -> Option<Target<'_>> {
        self.production_targets
            .get(name)
            .map(Target::Production)
            .or_else(|| self.test_targets.get(name).map(Target::Test))
    }

    pub fn target_or_err(&self, name: &str) -> Result<Target<'_>, TargetError> {
        self.target(name)
            .ok_or_else(|| TargetError::NotFound(name.to_string()))
    }

    /// Resolves test target ids, keeping their order.
    pub fn resolve_test_targets(&self, ids: &[TestTargetId]) -> Vec<&TestTarget> {
        ids.iter()
            .filter_map(|id| self.test_targets.by_id(*id))
            .collect()
    }

    /// Test targets covering any source of the given production target.
    pub fn covering_test_targets_for_production_target(&self, target: &ProductionTarget) -> Vec<&TestTarget> {
        self.build_target_coverage
            .get(&BuildTargetId::Production(target.id()))
            .map(|covering| {
                covering
                    .iter()
                    .filter_map(|id| self.test_targets.by_id(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Test targets that do not cover any source.
    pub fn not_covering_test_targets(&self) -> Vec<&TestTarget> {
        let covering: BTreeSet<TestTargetId> = self
            .sources
            .values()
            .flat_map(|data| data.covering_test_targets.iter().copied())
            .collect();
        self.test_targets
            .iter()
            .filter(|target| !covering.contains(&target.id()))
            .collect()
    }

    /// Gets the dependency of a source.
    ///
    /// The dependency of an autogen input is the union of the dependencies of
    /// all of its generated outputs.
    pub fn source_dependency(&self, path: &RepoPath) -> Option<SourceDependency> {
        let mut merged = DependencyData::default();
        let mut merge = |data: &DependencyData| {
            merged.parent_targets.extend(data.parent_targets.iter().copied());
            merged
                .covering_test_targets
                .extend(data.covering_test_targets.iter().copied());
        };

        if let Some(outputs) = self.autogen_input_to_outputs.get(path) {
            for output in outputs {
                if let Some(data) = self.sources.get(output) {
                    merge(data);
                }
            }
        }
        if let Some(data) = self.sources.get(path) {
            merge(data);
        }

        if merged.is_empty() {
            None
        } else {
            Some(SourceDependency::new(
                path.clone(),
                merged.parent_targets,
                merged.covering_test_targets,
            ))
        }
    }

    pub fn source_dependency_or_err(&self, path: &RepoPath) -> Result<SourceDependency, DependencyError> {
        self.source_dependency(path)
            .ok_or_else(|| DependencyError::NotFound(path.clone()))
    }

    /// Replaces the coverage of every source in the delta.
    ///
    /// Fails without touching the map if the delta covers an autogen input or
    /// names a test target that is not in the build.
    ///
    /// Test targets are only ever added to the reverse index here. A test
    /// target that stops covering a source stays in its parent targets'
    /// covering sets until that coverage is explicitly cleared.
    pub fn replace_source_coverage(&mut self, delta: &SourceCoveringTestsList) -> Result<(), ResolutionError> {
        if let Some(input) = delta
            .paths()
            .find(|path| self.autogen_input_to_outputs.contains_key(*path))
        {
            return Err(ResolutionError::AutogenInputCoverage(input.clone()));
        }
        for (path, tests) in delta.iter() {
            if let Some(name) = tests.iter().find(|name| !self.test_targets.contains(name)) {
                return Err(ResolutionError::UnknownTestTarget {
                    path: path.clone(),
                    test_target: name.clone(),
                });
            }
        }

        for (path, tests) in delta.iter() {
            let data = self.sources.entry(path.clone()).or_default();
            data.covering_test_targets.clear();

            for test_target in tests.iter().filter_map(|name| self.test_targets.get(name)) {
                data.covering_test_targets.insert(test_target.id());
                for parent in &data.parent_targets {
                    self.build_target_coverage
                        .entry(*parent)
                        .or_default()
                        .insert(test_target.id());
                }
            }

            if data.is_empty() {
                self.sources.remove(path);
            }
        }

        debug!(sources = delta.num_sources(), "replaced source coverage");
        Ok(())
    }

    /// Clears the coverage of the given sources and prunes the covering sets of
    /// their parent targets.
    ///
    /// Clearing an autogen input clears the coverage of its outputs.
    pub fn clear_source_coverage(&mut self, paths: &[RepoPath]) {
        let mut affected_parents = BTreeSet::new();
        for path in paths {
            let targets = match self.autogen_input_to_outputs.get(path) {
                Some(outputs) => outputs.clone(),
                None => vec![path.clone()],
            };
            for source in targets {
                let Some(data) = self.sources.get_mut(&source) else {
                    continue;
                };
                data.covering_test_targets.clear();
                affected_parents.extend(data.parent_targets.iter().copied());
                if data.is_empty() {
                    self.sources.remove(&source);
                }
            }
        }

        for parent in affected_parents {
            self.rebuild_build_target_coverage(parent);
        }
    }

    fn rebuild_build_target_coverage(&mut self, target: BuildTargetId) {
        let covering: BTreeSet<TestTargetId> = self
            .target_sources
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|source| self.sources.get(source))
            .flat_map(|data| data.covering_test_targets.iter().copied())
            .collect();
        if covering.is_empty() {
            self.build_target_coverage.remove(&target);
        } else {
            self.build_target_coverage.insert(target, covering);
        }
    }

    /// Clears all coverage, leaving only the build target relations.
    pub fn clear_all_source_coverage(&mut self) {
        self.sources.retain(|_, data| {
            data.covering_test_targets.clear();
            !data.parent_targets.is_empty()
        });
        self.build_target_coverage.clear();
    }

    /// Exports the coverage of every covered source, ordered by path.
    pub fn export_source_coverage(&self) -> SourceCoveringTestsList {
        self.sources
            .iter()
            .filter(|(_, data)| !data.covering_test_targets.is_empty())
            .map(|(path, data)| {
                let tests = data
                    .covering_test_targets
                    .iter()
                    .filter_map(|id| self.test_targets.by_id(*id))
                    .map(|target| target.name().to_string())
                    .collect();
                (path.clone(), tests)
            })
            .collect()
    }

    /// Sources with coverage data that no longer belong to any build target.
    pub fn orphan_source_files(&self) -> Vec<RepoPath> {
        let mut orphans: Vec<RepoPath> = self
            .sources
            .iter()
            .filter(|(_, data)| data.parent_targets.is_empty())
            .map(|(path, _)| path.clone())
            .collect();
        orphans.sort();
        orphans
    }

    /// Applies a change list to the map and resolves it to the dependencies of
    /// the changed sources.
    ///
    /// Every path is validated before anything is mutated, so a change list
    /// that contradicts the map leaves the map untouched.
    pub fn apply_and_resolve_change_list(
        &mut self,
        change_list: &ChangeList,
    ) -> Result<ChangeDependencyList, ResolutionError> {
        let mut coverage_to_delete = Vec::new();

        let mut created = Vec::new();
        for path in change_list.created() {
            let Some(dependency) = self.source_dependency(path) else {
                continue;
            };
            if dependency.num_covering_test_targets() > 0 {
                return Err(ResolutionError::CreatedWithCoverage(path.clone()));
            }
            if dependency.num_parent_targets() > 0 {
                created.push(dependency);
            }
        }

        let mut updated = Vec::new();
        for path in change_list.updated() {
            match self.source_dependency(path) {
                Some(dependency) if dependency.num_parent_targets() > 0 => updated.push(dependency),
                Some(dependency) => {
                    info!(source = %path, "updated source has coverage but no parent targets, treating as orphan");
                    coverage_to_delete.push(path.clone());
                    updated.push(dependency);
                }
                None => updated.push(SourceDependency::empty(path.clone())),
            }
        }

        let mut deleted = Vec::new();
        for path in change_list.deleted() {
            let Some(dependency) = self.source_dependency(path) else {
                continue;
            };
            if dependency.num_parent_targets() > 0 {
                return Err(ResolutionError::DeletedWithParentTargets(path.clone()));
            }
            coverage_to_delete.push(path.clone());
            deleted.push(dependency);
        }

        if !coverage_to_delete.is_empty() {
            self.clear_source_coverage(&coverage_to_delete);
        }

        Ok(ChangeDependencyList::new(created, updated, deleted))
    }
}
