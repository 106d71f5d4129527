//! Source dependency snapshots.

use crate::normalize::RepoPath;
use crate::target::{BuildTargetId, TestTargetId};
use std::collections::BTreeSet;

/// The build targets that compile a source and the test targets that cover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDependency {
    path: RepoPath,
    parent_targets: BTreeSet<BuildTargetId>,
    covering_test_targets: BTreeSet<TestTargetId>,
}

impl SourceDependency {
    pub fn new(
        path: RepoPath,
        parent_targets: BTreeSet<BuildTargetId>,
        covering_test_targets: BTreeSet<TestTargetId>,
    ) -> Self {
        Self { path, parent_targets, covering_test_targets }
    }

    /// A dependency for a source the map knows nothing about.
    pub fn empty(path: RepoPath) -> Self {
        Self::new(path, BTreeSet::new(), BTreeSet::new())
    }

    pub fn path(&self) -> &RepoPath {
        &self.path
    }

    pub fn parent_targets(&self) -> &BTreeSet<BuildTargetId> {
        &self.parent_targets
    }

    pub fn covering_test_targets(&self) -> &BTreeSet<TestTargetId> {
        &self.covering_test_targets
    }

    pub fn num_parent_targets(&self) -> usize {
        self.parent_targets.len()
    }

    pub fn num_covering_test_targets(&self) -> usize {
        self.covering_test_targets.len()
    }

    /// Parent targets that are test targets.
    pub fn parent_test_targets(&self) -> impl Iterator<Item = TestTargetId> + '_ {
        self.parent_targets.iter().filter_map(|id| match id {
            BuildTargetId::Test(test) => Some(*test),
            BuildTargetId::Production(_) => None,
        })
    }
}

/// A change list resolved against the dependency map.
///
/// Each sequence holds the dependencies as they were before the change was
/// applied, in the order of the originating change list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDependencyList {
    created: Vec<SourceDependency>,
    updated: Vec<SourceDependency>,
    deleted: Vec<SourceDependency>,
}

impl ChangeDependencyList {
    pub fn new(
        created: Vec<SourceDependency>,
        updated: Vec<SourceDependency>,
        deleted: Vec<SourceDependency>,
    ) -> Self {
        Self { created, updated, deleted }
    }

    pub fn created(&self) -> &[SourceDependency] {
        &self.created
    }

    pub fn updated(&self) -> &[SourceDependency] {
        &self.updated
    }

    pub fn deleted(&self) -> &[SourceDependency] {
        &self.deleted
    }

    /// All dependencies in created, updated, deleted order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceDependency> {
        self.created.iter().chain(&self.updated).chain(&self.deleted)
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
