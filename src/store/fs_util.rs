//! Guarded filesystem mutations

use crate::error::{VaultError, VaultResult};
use std::path::{Component, Path};

/// Reject paths that must never be deleted: empty, root, or without a named component
fn ensure_removable(path: &Path) -> VaultResult<()> {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    let has_normal = components.any(|c| matches!(c, Component::Normal(_)));
    if path.as_os_str().is_empty() || !has_normal || path.parent().is_none() {
        return Err(VaultError::UnsafePath(path.to_path_buf()));
    }
    Ok(())
}

/// Remove a single file; missing files are not an error
pub fn remove_file_guarded(path: &Path) -> VaultResult<()> {
    ensure_removable(path)?;
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::io_with_path(e, path)),
    }
}

/// Remove a directory tree; missing directories are not an error
pub fn remove_dir_all_guarded(path: &Path) -> VaultResult<()> {
    ensure_removable(path)?;
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::io_with_path(e, path)),
    }
}

/// Remove now-empty parent directories of `path`, stopping at `stop_at`
pub fn prune_empty_parents(path: &Path, stop_at: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        // remove_dir only succeeds on empty directories
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Copy one file, creating the destination's parent directories
pub fn copy_file(from: &Path, to: &Path) -> VaultResult<u64> {
    let copy_failed = |source: std::io::Error| VaultError::CopyFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(copy_failed)?;
    }
    std::fs::copy(from, to).map_err(copy_failed)
}

/// True if the directory exists and holds at least one regular file anywhere below it
pub fn has_any_file(dir: &Path) -> bool {
    dir.is_dir()
        && walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_root() {
        assert!(remove_file_guarded(Path::new("")).is_err());
        assert!(remove_dir_all_guarded(Path::new("/")).is_err());
        assert!(remove_dir_all_guarded(Path::new(".")).is_err());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(remove_file_guarded(&temp_dir.path().join("nope")).is_ok());
        assert!(remove_dir_all_guarded(&temp_dir.path().join("nope")).is_ok());
    }

    #[test]
    fn test_copy_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("src");
        std::fs::write(&src, "abc").unwrap();
        let dest = temp_dir.path().join("a/b/c/dest");
        assert_eq!(copy_file(&src, &dest).unwrap(), 3);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "abc");
    }

    #[test]
    fn test_copy_missing_source_is_copy_failed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = copy_file(&temp_dir.path().join("nope"), &temp_dir.path().join("x")).unwrap_err();
        assert!(matches!(err, VaultError::CopyFailed { .. }));
    }

    #[test]
    fn test_prune_empty_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("manifests");
        let file = root.join("host/library/demo/1b");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(root.join("host/keep"), "").unwrap();
        prune_empty_parents(&file, &root);
        assert!(!root.join("host/library").exists());
        assert!(root.join("host").exists());
    }

    #[test]
    fn test_has_any_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("d");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        assert!(!has_any_file(&dir));
        std::fs::write(dir.join("nested/f"), "x").unwrap();
        assert!(has_any_file(&dir));
        assert!(!has_any_file(&temp_dir.path().join("missing")));
    }
}
