//! Path normalization and identifier helpers.

pub mod path;
pub mod stable_id;

pub use path::{PathError, RepoPath};
