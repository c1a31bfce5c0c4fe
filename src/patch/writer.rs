//! Atomic file persistence.
//!
//! Patched images replace the target through a temporary file in the same
//! directory followed by a rename, so an interrupted process can never leave
//! a half-written binary behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

/// Replaces `path` with `contents` atomically.
///
/// The temporary file is created next to the target (renames across
/// filesystems are not atomic), synced to disk, given the original file's
/// permissions, and renamed over the target in one step.
pub fn persist_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
        .map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

    tmp.write_all(contents).map_err(|e| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.as_file().sync_all().map_err(|e| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    // Keep the target's permission bits (executables must stay executable).
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), metadata.permissions()).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    debug!(target = %path.display(), bytes = contents.len(), "renaming patched file into place");
    tmp.persist(path).map_err(|e| Error::FileWrite {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("binary");
        fs::write(&target, b"old content").unwrap();

        persist_atomic(&target, b"new content").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new content");
    }

    #[test]
    fn test_persist_creates_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh");
        persist_atomic(&target, b"payload").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[test]
    fn test_persist_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("binary");
        fs::write(&target, b"old").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).unwrap();

        persist_atomic(&target, b"new").unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_no_stray_temp_files_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("binary");
        persist_atomic(&target, b"data").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
