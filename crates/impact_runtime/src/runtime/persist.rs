//! The coverage ("TIA data") file on disk.

use crate::dependency::coverage::{
    deserialize_source_covering_tests, serialize_source_covering_tests, PersistedDataError, SourceCoveringTestsList,
};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

fn io_error(path: &Path, source: std::io::Error) -> PersistedDataError {
    PersistedDataError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Reads the coverage file. A missing file is not an error.
pub fn read_coverage_file(path: &Path) -> Result<Option<SourceCoveringTestsList>, PersistedDataError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    deserialize_source_covering_tests(&data).map(Some)
}

/// Replaces the coverage file atomically.
pub fn write_coverage_file(path: &Path, coverage: &SourceCoveringTestsList) -> Result<(), PersistedDataError> {
    let data = serialize_source_covering_tests(coverage)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    fs::write(tmp, data).map_err(|e| io_error(tmp, e))?;
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        io_error(path, e)
    })
}

/// Removes the coverage file if present.
pub fn remove_coverage_file(path: &Path) -> Result<(), PersistedDataError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}
