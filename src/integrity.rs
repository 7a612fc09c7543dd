//! Completeness checks for live models and backup directories

use crate::error::{VaultError, VaultResult};
use crate::metrics;
use crate::store::checksum::{ChecksumManifest, checksum_path_for};
use crate::store::fs_util::has_any_file;
use crate::store::{ModelSpec, StoreLayout, extract_blob_digests};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Knobs for [`IntegrityChecker::verify_model`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Reuse the blob list parsed earlier in this process
    pub use_cache: bool,
    /// Require every referenced blob; when false the manifest alone suffices
    pub check_blobs: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            check_blobs: true,
        }
    }
}

impl VerifyOptions {
    pub fn manifest_only() -> Self {
        Self {
            check_blobs: false,
            ..Default::default()
        }
    }

    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Default::default()
        }
    }
}

/// How much of the target was actually checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Every blob checked, or backup checksum recomputed and matched
    Full,
    /// Only manifest presence was checked
    ManifestOnly,
    /// Backup structure is valid but there was no checksum file to compare
    NoChecksum,
}

/// What was verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyTarget {
    Model(ModelSpec),
    Backup(PathBuf),
}

/// Outcome of a verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub complete: bool,
    pub confidence: Confidence,
    /// Human-readable reasons the target is not complete or not fully verified
    pub problems: Vec<String>,
}

impl VerifyResult {
    fn complete(confidence: Confidence) -> Self {
        Self {
            complete: true,
            confidence,
            problems: Vec::new(),
        }
    }

    fn incomplete(problems: Vec<String>) -> Self {
        Self {
            complete: false,
            confidence: Confidence::Full,
            problems,
        }
    }

    /// Complete, but with less than full confidence
    pub fn is_degraded(&self) -> bool {
        self.complete && self.confidence == Confidence::NoChecksum
    }
}

/// Result of comparing a backup against its sibling checksum file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    Matched,
    Absent,
}

/// Checks manifests, blobs and backup checksums
///
/// Keeps a process-lifetime cache of each spec's blob paths so repeated
/// checks in one run do not re-parse manifests. The cache is cleared
/// wholesale by [`IntegrityChecker::invalidate`].
pub struct IntegrityChecker {
    layout: StoreLayout,
    blob_cache: RwLock<HashMap<ModelSpec, Arc<Vec<PathBuf>>>>,
}

impl IntegrityChecker {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            blob_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Dispatch on the target kind
    pub fn verify(&self, target: &VerifyTarget, opts: VerifyOptions) -> VerifyResult {
        match target {
            VerifyTarget::Model(spec) => self.verify_model(spec, opts),
            VerifyTarget::Backup(dir) => self.verify_backup(dir),
        }
    }

    /// Check a model in the live store
    pub fn verify_model(&self, spec: &ModelSpec, opts: VerifyOptions) -> VerifyResult {
        let manifest_path = self.layout.manifest_path(spec);
        let result = if !manifest_path.is_file() {
            VerifyResult::incomplete(vec![format!("manifest missing: {}", manifest_path.display())])
        } else if !opts.check_blobs {
            VerifyResult::complete(Confidence::ManifestOnly)
        } else {
            match self.blob_paths(spec, opts.use_cache) {
                Ok(blobs) => {
                    let missing: Vec<String> = blobs
                        .iter()
                        .filter(|rel| !is_nonempty_file(&self.layout.models_dir().join(rel)))
                        .map(|rel| format!("blob missing or empty: {}", rel.display()))
                        .collect();
                    if missing.is_empty() {
                        VerifyResult::complete(Confidence::Full)
                    } else {
                        VerifyResult::incomplete(missing)
                    }
                }
                Err(e) => VerifyResult::incomplete(vec![e.to_string()]),
            }
        };

        tracing::debug!(
            model = %spec,
            complete = result.complete,
            problems = result.problems.len(),
            "Verified model"
        );
        metrics::record_verification("model", result.complete);
        result
    }

    /// Blob paths (relative to the models dir) referenced by a spec's manifest
    pub fn blob_paths(&self, spec: &ModelSpec, use_cache: bool) -> VaultResult<Arc<Vec<PathBuf>>> {
        if use_cache {
            let cache = self.blob_cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(paths) = cache.get(spec) {
                return Ok(paths.clone());
            }
        }

        let digests = extract_blob_digests(&self.layout.manifest_path(spec))?;
        let paths: Arc<Vec<PathBuf>> = Arc::new(
            digests
                .iter()
                .map(|d| self.layout.blob_rel_path(d))
                .collect(),
        );

        if use_cache {
            self.blob_cache
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(spec.clone(), paths.clone());
        }

        Ok(paths)
    }

    /// Check a backup directory's structure and, when present, its checksum file
    pub fn verify_backup(&self, dir: &Path) -> VerifyResult {
        let result = if !dir.is_dir() {
            VerifyResult::incomplete(vec![format!("backup directory missing: {}", dir.display())])
        } else {
            let mut problems = Vec::new();
            for sub in ["manifests", "blobs"] {
                if !has_any_file(&dir.join(sub)) {
                    problems.push(format!("{}/ is missing or empty", sub));
                }
            }

            if !problems.is_empty() {
                VerifyResult::incomplete(problems)
            } else {
                match verify_backup_checksum(dir) {
                    Ok(ChecksumStatus::Matched) => VerifyResult::complete(Confidence::Full),
                    Ok(ChecksumStatus::Absent) => VerifyResult {
                        complete: true,
                        confidence: Confidence::NoChecksum,
                        problems: vec![format!(
                            "no checksum file at {}",
                            checksum_path_for(dir).display()
                        )],
                    },
                    Err(VaultError::ChecksumMismatch { entries, .. }) => VerifyResult::incomplete(
                        entries
                            .into_iter()
                            .map(|p| format!("checksum mismatch: {}", p))
                            .collect(),
                    ),
                    Err(e) => VerifyResult::incomplete(vec![e.to_string()]),
                }
            }
        };

        if result.is_degraded() {
            tracing::warn!(backup = ?dir, "Backup has no checksum file, integrity not verified");
        }
        metrics::record_verification("backup", result.complete);
        result
    }

    /// Drop every cached blob list
    pub fn invalidate(&self) {
        self.blob_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::debug!("Blob list cache invalidated");
    }

    pub fn cached_specs(&self) -> usize {
        self.blob_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Recompute a backup's checksum manifest and compare it byte-for-byte with the stored one
pub fn verify_backup_checksum(dir: &Path) -> VaultResult<ChecksumStatus> {
    let checksum_file = checksum_path_for(dir);
    if !checksum_file.is_file() {
        return Ok(ChecksumStatus::Absent);
    }

    let stored = ChecksumManifest::read(&checksum_file)?;
    let actual = ChecksumManifest::compute(dir)?;
    if actual.render() == stored {
        return Ok(ChecksumStatus::Matched);
    }

    let mut entries = ChecksumManifest::parse(&stored).diff(&actual);
    if entries.is_empty() {
        // same entries, formatting differs
        entries.push(checksum_file.display().to_string());
    }
    Err(VaultError::ChecksumMismatch {
        path: dir.to_path_buf(),
        entries,
    })
}

fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
