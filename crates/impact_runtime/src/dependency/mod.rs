//! Source dependency tracking and test selection.
//!
//! Components:
//! - `change_list`: created/updated/deleted sources of a change
//! - `coverage`: coverage snapshots and their persisted form
//! - `graph`: build target dependency graph used for prioritization
//! - `map`: the dynamic dependency map
//! - `selector`: change-driven test selection and prioritization

pub mod change_list;
pub mod coverage;
pub mod graph;
pub mod map;
pub mod selector;
pub mod source;

pub use change_list::{ChangeList, ChangeListError};
pub use coverage::{PersistedDataError, SourceCoveringTestsList};
pub use graph::{GraphError, TargetGraph};
pub use map::DynamicDependencyMap;
pub use selector::TestSelectorAndPrioritizer;
pub use source::{ChangeDependencyList, SourceDependency};

use crate::normalize::RepoPath;
use thiserror::Error;

/// Errors from resolving changes or coverage against the dependency map.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("created source '{0}' already has coverage data")]
    CreatedWithCoverage(RepoPath),
    #[error("deleted source '{0}' still belongs to a build target")]
    DeletedWithParentTargets(RepoPath),
    #[error("coverage data supplied for autogen input '{0}'")]
    AutogenInputCoverage(RepoPath),
    #[error("coverage for '{path}' names unknown test target '{test_target}'")]
    UnknownTestTarget { path: RepoPath, test_target: String },
}

/// Errors from querying the dependency map.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("no dependency data for source '{0}'")]
    NotFound(RepoPath),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}
