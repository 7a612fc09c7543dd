//! Whole-directory checksum manifests
//!
//! Format: one `<sha256-hex>  <relative-path>` line per regular file, sorted
//! by relative path, `/` as separator, trailing newline. Two manifests are
//! equal iff their rendered bytes are equal.

use crate::error::{VaultError, VaultResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Read buffer for hashing (1MB)
const CHUNK_SIZE: usize = 1024 * 1024;

/// Extension of the sibling checksum file
pub const CHECKSUM_EXTENSION: &str = "checksum";

/// Sorted mapping of relative path to content hash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: BTreeMap<String, String>,
}

impl ChecksumManifest {
    /// Hash every regular file under `dir`
    pub fn compute(dir: &Path) -> VaultResult<Self> {
        let mut entries = BTreeMap::new();

        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                VaultError::io_with_path(e.into(), path)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(dir) else {
                continue;
            };
            entries.insert(relative_key(rel), hash_file(entry.path())?);
        }

        Ok(Self { entries })
    }

    /// Parse a rendered manifest; malformed lines are skipped
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| line.split_once("  "))
            .map(|(hash, path)| (path.to_string(), hash.to_string()))
            .collect();
        Self { entries }
    }

    /// Load a checksum file written by [`ChecksumManifest::write`]
    pub fn read(path: &Path) -> VaultResult<String> {
        std::fs::read_to_string(path).map_err(|e| VaultError::io_with_path(e, path))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (path, hash) in &self.entries {
            out.push_str(hash);
            out.push_str("  ");
            out.push_str(path);
            out.push('\n');
        }
        out
    }

    /// Write atomically: temp file, sync, rename
    pub fn write(&self, path: &Path) -> VaultResult<()> {
        let temp_file = temp_path(path);
        let wrap = |source: std::io::Error| VaultError::ChecksumWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let mut file = std::fs::File::create(&temp_file).map_err(wrap)?;
        file.write_all(self.render().as_bytes()).map_err(wrap)?;
        file.sync_all().map_err(wrap)?;
        drop(file);

        std::fs::rename(&temp_file, path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_file);
            wrap(e)
        })
    }

    /// Paths whose hash differs or that exist on only one side
    pub fn diff(&self, other: &Self) -> Vec<String> {
        let mut differing: Vec<String> = self
            .entries
            .iter()
            .filter(|(path, hash)| other.entries.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect();
        differing.extend(
            other
                .entries
                .keys()
                .filter(|path| !self.entries.contains_key(*path))
                .cloned(),
        );
        differing.sort();
        differing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(relative path, hash)` in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, h)| (p.as_str(), h.as_str()))
    }
}

/// Sibling checksum file for a backup directory: `<parent>/<name>.checksum`
pub fn checksum_path_for(dir: &Path) -> PathBuf {
    sibling_with_suffix(dir, &format!(".{}", CHECKSUM_EXTENSION))
}

pub(crate) fn sibling_with_suffix(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = dir.parent().unwrap_or(Path::new(""));
    parent.join(format!("{}{}", name, suffix))
}

/// Stream a file through sha256
pub fn hash_file(path: &Path) -> VaultResult<String> {
    let mut file = std::fs::File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| VaultError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("manifests/registry.ollama.ai/library/demo")).unwrap();
        std::fs::create_dir_all(root.join("blobs")).unwrap();
        std::fs::write(
            root.join("manifests/registry.ollama.ai/library/demo/1b"),
            "{}",
        )
        .unwrap();
        std::fs::write(root.join("blobs/sha256-bb"), "second").unwrap();
        std::fs::write(root.join("blobs/sha256-aa"), "first").unwrap();
        temp_dir
    }

    #[test]
    fn test_hash_file_known_value() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("f");
        std::fs::write(&path, "hello world").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_is_sorted_and_relative() {
        let dir = fixture();
        let manifest = ChecksumManifest::compute(dir.path()).unwrap();
        let paths: Vec<&str> = manifest.iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "blobs/sha256-aa",
                "blobs/sha256-bb",
                "manifests/registry.ollama.ai/library/demo/1b"
            ]
        );
        let rendered = manifest.render();
        assert!(rendered.ends_with('\n'));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let dir = fixture();
        let a = ChecksumManifest::compute(dir.path()).unwrap().render();
        let b = ChecksumManifest::compute(dir.path()).unwrap().render();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_byte_change_detected() {
        let dir = fixture();
        let before = ChecksumManifest::compute(dir.path()).unwrap();
        std::fs::write(dir.path().join("blobs/sha256-aa"), "firsT").unwrap();
        let after = ChecksumManifest::compute(dir.path()).unwrap();
        assert_ne!(before.render(), after.render());
        assert_eq!(before.diff(&after), vec!["blobs/sha256-aa".to_string()]);
    }

    #[test]
    fn test_parse_roundtrip_and_diff_missing() {
        let dir = fixture();
        let manifest = ChecksumManifest::compute(dir.path()).unwrap();
        let parsed = ChecksumManifest::parse(&manifest.render());
        assert_eq!(parsed, manifest);

        std::fs::remove_file(dir.path().join("blobs/sha256-bb")).unwrap();
        let after = ChecksumManifest::compute(dir.path()).unwrap();
        assert_eq!(manifest.diff(&after), vec!["blobs/sha256-bb".to_string()]);
    }

    #[test]
    fn test_write_and_read() {
        let dir = fixture();
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("demo_1b.checksum");
        let manifest = ChecksumManifest::compute(dir.path()).unwrap();
        manifest.write(&path).unwrap();
        assert_eq!(ChecksumManifest::read(&path).unwrap(), manifest.render());
        assert!(!out.path().join("demo_1b.checksum.tmp").exists());
    }

    #[test]
    fn test_checksum_path_for() {
        assert_eq!(
            checksum_path_for(Path::new("/backups/demo_1b/demo_1b")),
            PathBuf::from("/backups/demo_1b/demo_1b.checksum")
        );
        assert_eq!(
            checksum_path_for(Path::new("/b/hf.co_user_repo_Q4/hf.co_user_repo_Q4")),
            PathBuf::from("/b/hf.co_user_repo_Q4/hf.co_user_repo_Q4.checksum")
        );
    }
}
