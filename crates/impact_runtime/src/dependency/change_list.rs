//! Change lists of created, updated and deleted sources.

use crate::normalize::{PathError, RepoPath};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur when building a change list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeListError {
    #[error("'{0}' appears more than once in the change list")]
    DuplicatePath(RepoPath),
    #[error("invalid path in change list: {0}")]
    InvalidPath(#[from] PathError),
    #[error("invalid change list: {0}")]
    Malformed(String),
}

/// Created, updated and deleted source files of a change.
///
/// The three sequences are disjoint and keep the caller's order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChangeList", rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(rename = "createdFiles")]
    created: Vec<RepoPath>,
    #[serde(rename = "updatedFiles")]
    updated: Vec<RepoPath>,
    #[serde(rename = "deletedFiles")]
    deleted: Vec<RepoPath>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChangeList {
    #[serde(default)]
    created_files: Vec<RepoPath>,
    #[serde(default)]
    updated_files: Vec<RepoPath>,
    #[serde(default)]
    deleted_files: Vec<RepoPath>,
}

impl TryFrom<RawChangeList> for ChangeList {
    type Error = ChangeListError;

    fn try_from(raw: RawChangeList) -> Result<Self, Self::Error> {
        Self::new(raw.created_files, raw.updated_files, raw.deleted_files)
    }
}

impl ChangeList {
    /// Builds a change list, rejecting any path listed more than once.
    pub fn new(
        created: Vec<RepoPath>,
        updated: Vec<RepoPath>,
        deleted: Vec<RepoPath>,
    ) -> Result<Self, ChangeListError> {
        let mut seen = HashSet::with_capacity(created.len() + updated.len() + deleted.len());
        for path in created.iter().chain(&updated).chain(&deleted) {
            if !seen.insert(path) {
                return Err(ChangeListError::DuplicatePath(path.clone()));
            }
        }
        Ok(Self { created, updated, deleted })
    }

    /// Builds a change list from unnormalized path strings.
    pub fn from_strs(created: &[&str], updated: &[&str], deleted: &[&str]) -> Result<Self, ChangeListError> {
        let convert = |paths: &[&str]| -> Result<Vec<RepoPath>, PathError> {
            paths.iter().map(RepoPath::new).collect()
        };
        Self::new(convert(created)?, convert(updated)?, convert(deleted)?)
    }

    /// Parses a change list from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ChangeListError> {
        serde_json::from_str(json).map_err(|e| ChangeListError::Malformed(e.to_string()))
    }

    pub fn created(&self) -> &[RepoPath] {
        &self.created
    }

    pub fn updated(&self) -> &[RepoPath] {
        &self.updated
    }

    pub fn deleted(&self) -> &[RepoPath] {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_of_each_sequence() {
        let list = ChangeList::from_strs(&["b.cpp", "a.cpp"], &["d.cpp", "c.cpp"], &[]).unwrap();
        let created: Vec<&str> = list.created().iter().map(RepoPath::as_str).collect();
        assert_eq!(created, vec!["b.cpp", "a.cpp"]);
        let updated: Vec<&str> = list.updated().iter().map(RepoPath::as_str).collect();
        assert_eq!(updated, vec!["d.cpp", "c.cpp"]);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn rejects_path_in_two_sequences() {
        let err = ChangeList::from_strs(&["a.cpp"], &[], &["a.cpp"]).unwrap_err();
        assert_eq!(err, ChangeListError::DuplicatePath(RepoPath::new("a.cpp").unwrap()));
    }

    #[test]
    fn rejects_path_repeated_after_normalization() {
        let err = ChangeList::from_strs(&[], &["Code/a.cpp", "Code\\a.cpp"], &[]).unwrap_err();
        assert!(matches!(err, ChangeListError::DuplicatePath(_)));
    }

    #[test]
    fn rejects_invalid_paths() {
        let err = ChangeList::from_strs(&["../a.cpp"], &[], &[]).unwrap_err();
        assert_eq!(err, ChangeListError::InvalidPath(PathError::PathTraversal));
    }

    #[test]
    fn parses_json_with_missing_sequences() {
        let list = ChangeList::from_json(r#"{ "updatedFiles": ["Code/a.cpp"] }"#).unwrap();
        assert!(list.created().is_empty());
        assert_eq!(list.updated()[0].as_str(), "Code/a.cpp");
        assert!(list.deleted().is_empty());
    }

    #[test]
    fn json_with_conflicting_paths_is_malformed() {
        let err = ChangeList::from_json(r#"{ "createdFiles": ["a.cpp"], "deletedFiles": ["a.cpp"] }"#)
            .unwrap_err();
        assert!(matches!(err, ChangeListError::Malformed(_)));
    }

    #[test]
    fn serializes_with_json_field_names() {
        let list = ChangeList::from_strs(&["a.cpp"], &[], &[]).unwrap();
        let json = serde_json::to_string(&list).unwrap();
        assert!(json.contains("\"createdFiles\":[\"a.cpp\"]"));
        assert_eq!(ChangeList::from_json(&json).unwrap(), list);
    }
}
