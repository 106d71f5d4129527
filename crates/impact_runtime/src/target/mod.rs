//! Build targets of the repository.
//!
//! Production and test targets are built once from their descriptors and are
//! immutable afterwards. Every target gets a typed id equal to its position in
//! its list, so ids double as the stable declaration order.

pub mod descriptor;

use crate::normalize::RepoPath;
use descriptor::{LaunchMethod, ProductionTargetDescriptor, TargetSources, TestTargetDescriptor};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when building or querying target lists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("build target '{0}' not found")]
    NotFound(String),
    #[error("build target '{0}' is declared more than once")]
    Duplicate(String),
}

/// Id of a production target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductionTargetId(usize);

/// Id of a test target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestTargetId(usize);

/// Id of either kind of build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildTargetId {
    Production(ProductionTargetId),
    Test(TestTargetId),
}

/// Data common to every build target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    name: String,
    output_name: String,
    path: String,
    sources: TargetSources,
}

impl BuildTarget {
    fn from_descriptor(descriptor: descriptor::BuildTargetDescriptor) -> Self {
        Self {
            name: descriptor.name,
            output_name: descriptor.output_name,
            path: descriptor.path,
            sources: descriptor.sources,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sources(&self) -> &TargetSources {
        &self.sources
    }

    /// Sources actually compiled by the target: static sources and autogen outputs.
    pub fn compiled_sources(&self) -> impl Iterator<Item = &RepoPath> {
        self.sources.static_sources.iter().chain(
            self.sources
                .autogen_sources
                .iter()
                .flat_map(|pair| pair.outputs.iter()),
        )
    }
}

/// A build target that is not a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionTarget {
    id: ProductionTargetId,
    build: BuildTarget,
}

impl ProductionTarget {
    pub fn id(&self) -> ProductionTargetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.build.name
    }
}

/// A build target whose binary contains tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTarget {
    id: TestTargetId,
    build: BuildTarget,
    suite: String,
    launch_method: LaunchMethod,
    shards: u32,
}

impl TestTarget {
    pub fn id(&self) -> TestTargetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.build.name
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn launch_method(&self) -> LaunchMethod {
        self.launch_method
    }

    /// Number of shards the target may be split into, at least one.
    pub fn shards(&self) -> u32 {
        self.shards.max(1)
    }
}

/// Access to the shared build target data of a specialized target.
pub trait HasBuildTarget {
    fn build_target(&self) -> &BuildTarget;
}

impl HasBuildTarget for ProductionTarget {
    fn build_target(&self) -> &BuildTarget {
        &self.build
    }
}

impl HasBuildTarget for TestTarget {
    fn build_target(&self) -> &BuildTarget {
        &self.build
    }
}

/// A specialized view of a build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Production(&'a ProductionTarget),
    Test(&'a TestTarget),
}

impl<'a> Target<'a> {
    pub fn build_target(&self) -> &'a BuildTarget {
        match self {
            Target::Production(target) => &target.build,
            Target::Test(target) => &target.build,
        }
    }

    pub fn id(&self) -> BuildTargetId {
        match self {
            Target::Production(target) => BuildTargetId::Production(target.id),
            Target::Test(target) => BuildTargetId::Test(target.id),
        }
    }
}

/// Targets of one kind in declaration order, with lookup by name.
#[derive(Debug, Clone)]
pub struct TargetList<T> {
    targets: Vec<T>,
    by_name: HashMap<String, usize>,
}

impl<T: HasBuildTarget> TargetList<T> {
    fn from_targets(targets: Vec<T>) -> Result<Self, TargetError> {
        let mut by_name = HashMap::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            let name = target.build_target().name();
            if by_name.insert(name.to_string(), index).is_some() {
                return Err(TargetError::Duplicate(name.to_string()));
            }
        }
        Ok(Self { targets, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.by_name.get(name).map(|&index| &self.targets[index])
    }

    pub fn get_or_err(&self, name: &str) -> Result<&T, TargetError> {
        self.get(name)
            .ok_or_else(|| TargetError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn targets(&self) -> &[T] {
        &self.targets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

pub type ProductionTargetList = TargetList<ProductionTarget>;
pub type TestTargetList = TargetList<TestTarget>;

impl ProductionTargetList {
    pub fn from_descriptors(descriptors: Vec<ProductionTargetDescriptor>) -> Result<Self, TargetError> {
        let targets = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| ProductionTarget {
                id: ProductionTargetId(index),
                build: BuildTarget::from_descriptor(descriptor.build),
            })
            .collect();
        Self::from_targets(targets)
    }

    pub fn by_id(&self, id: ProductionTargetId) -> Option<&ProductionTarget> {
        self.targets.get(id.0)
    }
}

impl TestTargetList {
    pub fn from_descriptors(descriptors: Vec<TestTargetDescriptor>) -> Result<Self, TargetError> {
        let targets = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| TestTarget {
                id: TestTargetId(index),
                build: BuildTarget::from_descriptor(descriptor.build),
                suite: descriptor.suite,
                launch_method: descriptor.launch_method,
                shards: descriptor.shards,
            })
            .collect();
        Self::from_targets(targets)
    }

    pub fn by_id(&self, id: TestTargetId) -> Option<&TestTarget> {
        self.targets.get(id.0)
    }
}
