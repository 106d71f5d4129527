//! Source coverage snapshots and their persisted form.
//!
//! The persisted form is a versioned JSON envelope carrying a BLAKE3 checksum
//! of the source map, so truncated or hand-edited files are detected on load.

use crate::normalize::RepoPath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Current version of the persisted coverage format.
const COVERAGE_FORMAT_VERSION: u32 = 1;

/// Errors that can occur reading or writing persisted coverage.
#[derive(Debug, Error)]
pub enum PersistedDataError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid coverage data: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported coverage format version {0}")]
    UnsupportedVersion(u32),
    #[error("coverage checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },
}

/// Mapping from source path to the names of the test targets covering it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCoveringTestsList {
    sources: BTreeMap<RepoPath, BTreeSet<String>>,
}

impl SourceCoveringTestsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds covering tests for a source, merging with any already present.
    pub fn insert<I, S>(&mut self, path: RepoPath, tests: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources
            .entry(path)
            .or_default()
            .extend(tests.into_iter().map(Into::into));
    }

    /// Records a source with no covering tests.
    ///
    /// Replacing coverage with such an entry clears the source's coverage.
    pub fn insert_uncovered(&mut self, path: RepoPath) {
        self.sources.entry(path).or_default();
    }

    pub fn covering_tests(&self, path: &str) -> Option<&BTreeSet<String>> {
        self.sources.get(path)
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RepoPath, &BTreeSet<String>)> {
        self.sources.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &RepoPath> {
        self.sources.keys()
    }
}

impl FromIterator<(RepoPath, BTreeSet<String>)> for SourceCoveringTestsList {
    fn from_iter<T: IntoIterator<Item = (RepoPath, BTreeSet<String>)>>(iter: T) -> Self {
        let mut list = Self::new();
        for (path, tests) in iter {
            list.insert(path, tests);
        }
        list
    }
}

#[derive(Serialize, Deserialize)]
struct CoverageEnvelope {
    version: u32,
    checksum: String,
    sources: BTreeMap<RepoPath, BTreeSet<String>>,
}

fn checksum(sources: &BTreeMap<RepoPath, BTreeSet<String>>) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(sources)?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// Serializes a coverage snapshot into its persisted form.
pub fn serialize_source_covering_tests(list: &SourceCoveringTestsList) -> Result<String, PersistedDataError> {
    let envelope = CoverageEnvelope {
        version: COVERAGE_FORMAT_VERSION,
        checksum: checksum(&list.sources)?,
        sources: list.sources.clone(),
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Parses and verifies a persisted coverage snapshot.
pub fn deserialize_source_covering_tests(data: &str) -> Result<SourceCoveringTestsList, PersistedDataError> {
    let envelope: CoverageEnvelope = serde_json::from_str(data)?;
    if envelope.version != COVERAGE_FORMAT_VERSION {
        return Err(PersistedDataError::UnsupportedVersion(envelope.version));
    }
    let found = checksum(&envelope.sources)?;
    if found != envelope.checksum {
        return Err(PersistedDataError::ChecksumMismatch {
            expected: envelope.checksum,
            found,
        });
    }
    Ok(SourceCoveringTestsList { sources: envelope.sources })
}
