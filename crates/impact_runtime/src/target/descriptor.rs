//! Build target descriptors.
//!
//! Descriptors are produced by external loaders from the build system's
//! source-to-target mapping artifacts and arrive here already parsed.

use crate::normalize::RepoPath;
use serde::{Deserialize, Serialize};

/// An autogen input source and the output sources generated from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutogenPair {
    pub input: RepoPath,
    pub outputs: Vec<RepoPath>,
}

/// The sources compiled by a build target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSources {
    #[serde(default)]
    pub static_sources: Vec<RepoPath>,
    #[serde(default)]
    pub autogen_sources: Vec<AutogenPair>,
}

/// Descriptor fields shared by production and test targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTargetDescriptor {
    pub name: String,
    #[serde(default)]
    pub output_name: String,
    /// Path to the directory the target is declared in.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub sources: TargetSources,
}

impl BuildTargetDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output_name: name.clone(),
            name,
            path: String::new(),
            sources: TargetSources::default(),
        }
    }

    /// Adds static sources to the descriptor.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = RepoPath>) -> Self {
        self.sources.static_sources.extend(sources);
        self
    }

    /// Adds an autogen input and its generated outputs to the descriptor.
    #[must_use]
    pub fn with_autogen(mut self, input: RepoPath, outputs: Vec<RepoPath>) -> Self {
        self.sources.autogen_sources.push(AutogenPair { input, outputs });
        self
    }
}

/// Descriptor of a production (non-test) build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionTargetDescriptor {
    #[serde(flatten)]
    pub build: BuildTargetDescriptor,
}

impl From<BuildTargetDescriptor> for ProductionTargetDescriptor {
    fn from(build: BuildTargetDescriptor) -> Self {
        Self { build }
    }
}

/// How a test target binary is launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMethod {
    /// Loaded by the shared test runner binary.
    #[default]
    TestRunner,
    /// Runs as its own executable.
    StandAlone,
}

fn default_shards() -> u32 {
    1
}

/// Descriptor of a test build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTargetDescriptor {
    #[serde(flatten)]
    pub build: BuildTargetDescriptor,
    #[serde(default)]
    pub suite: String,
    #[serde(default)]
    pub launch_method: LaunchMethod,
    /// Number of concurrent shards the target may be split into.
    #[serde(default = "default_shards")]
    pub shards: u32,
}

impl From<BuildTargetDescriptor> for TestTargetDescriptor {
    fn from(build: BuildTargetDescriptor) -> Self {
        Self {
            build,
            suite: String::new(),
            launch_method: LaunchMethod::default(),
            shards: default_shards(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_deserializes_with_defaults() {
        let json = r#"{
            "name": "AzCore.Tests",
            "sources": { "staticSources": ["Code/AzCore/Tests/Math.cpp"] }
        }"#;
        let descriptor: TestTargetDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.build.name, "AzCore.Tests");
        assert_eq!(descriptor.build.sources.static_sources.len(), 1);
        assert_eq!(descriptor.launch_method, LaunchMethod::TestRunner);
        assert_eq!(descriptor.shards, 1);
        assert!(descriptor.suite.is_empty());
    }

    #[test]
    fn production_descriptor_deserializes_autogen_pairs() {
        let json = r#"{
            "name": "AzCore",
            "outputName": "AzCore.dll",
            "sources": {
                "autogenSources": [
                    { "input": "Code/AzCore/Net.xml", "outputs": ["Gen/Net.h", "Gen/Net.cpp"] }
                ]
            }
        }"#;
        let descriptor: ProductionTargetDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.build.output_name, "AzCore.dll");
        let pair = &descriptor.build.sources.autogen_sources[0];
        assert_eq!(pair.input.as_str(), "Code/AzCore/Net.xml");
        assert_eq!(pair.outputs.len(), 2);
    }

    #[test]
    fn descriptor_rejects_escaping_source_paths() {
        let json = r#"{ "name": "Bad", "sources": { "staticSources": ["../outside.cpp"] } }"#;
        assert!(serde_json::from_str::<ProductionTargetDescriptor>(json).is_err());
    }
}
