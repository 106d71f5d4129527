//! Repository path normalization.
//!
//! Normalizes paths to forward slashes and validates that they stay inside the
//! repository they are relative to.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during path normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path contains disallowed '..' component")]
    PathTraversal,
    #[error("path contains invalid characters")]
    InvalidChars,
    #[error("path exceeds maximum length of {0} characters")]
    TooLong(usize),
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path '{0}' is outside the repository root")]
    OutsideRoot(String),
}

/// Maximum length for repository-relative paths.
const MAX_REPO_PATH_LEN: usize = 4096;

/// Rewrites backslash separators as `/` and collapses runs of separators.
pub fn normalize_slashes(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && result.ends_with('/') {
            continue;
        }
        result.push(c);
    }
    result
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/') || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Validates an already slash-normalized repository-relative path.
fn validate_repo_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.len() > MAX_REPO_PATH_LEN {
        return Err(PathError::TooLong(MAX_REPO_PATH_LEN));
    }
    if is_absolute(path) {
        return Err(PathError::Absolute);
    }
    if path.split('/').any(|component| component == "..") {
        return Err(PathError::PathTraversal);
    }
    if path.chars().any(char::is_control) {
        return Err(PathError::InvalidChars);
    }
    Ok(())
}

/// A normalized, repository-relative path.
///
/// Always uses forward slashes, never starts with `./`, never ends with `/`
/// and never escapes the repository through `..`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath(String);

impl RepoPath {
    /// Normalizes and validates a repository-relative path.
    pub fn new(path: impl AsRef<str>) -> Result<Self, PathError> {
        let normalized = normalize_slashes(path.as_ref());
        let mut trimmed = normalized.as_str();
        while let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        }
        let trimmed = trimmed.trim_end_matches('/');
        validate_repo_path(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    /// Makes `path` relative to `root` if it is absolute, then normalizes it.
    ///
    /// Instrumentation tools report absolute paths; descriptors and change
    /// lists use relative ones. Both end up as the same `RepoPath`.
    pub fn relative_to(path: &str, root: &str) -> Result<Self, PathError> {
        let path = normalize_slashes(path);
        if !is_absolute(&path) {
            return Self::new(&path);
        }

        let root = normalize_slashes(root);
        let root = root.trim_end_matches('/');
        let relative = path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| PathError::OutsideRoot(path.clone()))?;
        Self::new(relative)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepoPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RepoPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepoPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RepoPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepoPath> for String {
    fn from(path: RepoPath) -> Self {
        path.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn windows_separators_become_forward_slashes() {
        assert_eq!(normalize_slashes("Code\\Framework\\a.cpp"), "Code/Framework/a.cpp");
        assert_eq!(normalize_slashes("C:\\repo\\Code//a.cpp"), "C:/repo/Code/a.cpp");
    }

    #[test]
    fn separator_runs_collapse() {
        assert_eq!(normalize_slashes("Code//Framework\\\\a.cpp"), "Code/Framework/a.cpp");
    }

    #[test]
    fn repo_path_normalizes_separators_and_dot_prefix() {
        let path = RepoPath::new(".\\Code\\Framework//AzCore/Math.cpp").unwrap();
        assert_eq!(path.as_str(), "Code/Framework/AzCore/Math.cpp");
    }

    #[test]
    fn repo_path_strips_trailing_slash() {
        assert_eq!(RepoPath::new("Code/Tools/").unwrap().as_str(), "Code/Tools");
    }

    #[test]
    fn repo_path_rejects_empty() {
        assert_eq!(RepoPath::new(""), Err(PathError::Empty));
        assert_eq!(RepoPath::new("./"), Err(PathError::Empty));
    }

    #[test]
    fn repo_path_rejects_traversal() {
        assert_eq!(RepoPath::new("Code/../secrets"), Err(PathError::PathTraversal));
        assert_eq!(RepoPath::new(".."), Err(PathError::PathTraversal));
    }

    #[test]
    fn repo_path_rejects_absolute() {
        assert_eq!(RepoPath::new("/repo/a.cpp"), Err(PathError::Absolute));
        assert_eq!(RepoPath::new("C:\\repo\\a.cpp"), Err(PathError::Absolute));
    }

    #[test]
    fn repo_path_rejects_control_chars() {
        assert_eq!(RepoPath::new("a\nb.cpp"), Err(PathError::InvalidChars));
    }

    #[test]
    fn repo_path_rejects_too_long() {
        let long = "a".repeat(MAX_REPO_PATH_LEN + 1);
        assert_eq!(RepoPath::new(long), Err(PathError::TooLong(MAX_REPO_PATH_LEN)));
    }

    #[test]
    fn relative_to_strips_root() {
        let path = RepoPath::relative_to("/home/dev/o3de/Code/a.cpp", "/home/dev/o3de/").unwrap();
        assert_eq!(path.as_str(), "Code/a.cpp");
    }

    #[test]
    fn relative_to_handles_windows_paths() {
        let path = RepoPath::relative_to("D:\\o3de\\Code\\a.cpp", "D:\\o3de").unwrap();
        assert_eq!(path.as_str(), "Code/a.cpp");
    }

    #[test]
    fn relative_to_keeps_relative_paths() {
        let path = RepoPath::relative_to("Code/a.cpp", "/home/dev/o3de").unwrap();
        assert_eq!(path.as_str(), "Code/a.cpp");
    }

    #[test]
    fn relative_to_rejects_paths_outside_root() {
        let err = RepoPath::relative_to("/usr/include/stdio.h", "/home/dev/o3de").unwrap_err();
        assert!(matches!(err, PathError::OutsideRoot(_)));
    }

    #[test]
    fn relative_to_does_not_match_sibling_prefix() {
        let err = RepoPath::relative_to("/home/dev/o3de-extra/a.cpp", "/home/dev/o3de").unwrap_err();
        assert!(matches!(err, PathError::OutsideRoot(_)));
    }

    #[test]
    fn repo_path_deserializes_with_validation() {
        let ok: RepoPath = serde_json::from_str("\"Code\\\\a.cpp\"").unwrap();
        assert_eq!(ok.as_str(), "Code/a.cpp");
        assert!(serde_json::from_str::<RepoPath>("\"../a.cpp\"").is_err());
    }
}
