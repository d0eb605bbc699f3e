//! Atomic file writes for crash-safe persistence.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, StoreError};

/// Writes data to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it onto
/// the target path, so a partially written file is never observable. The
/// temp file must live in the same directory so the rename never crosses a
/// filesystem boundary.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let dir = path.parent().unwrap_or(Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    temp.write_all(data).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    temp.flush().map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    temp.persist(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_file_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");

        atomic_write(&path, b"status=working\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "status=working\n");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/meta");

        atomic_write(&path, b"x").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn replaces_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");

        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }
}
