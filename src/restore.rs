//! Conflict-aware restore of a backup into the live store
//!
//! A restore runs four ordered stages; each must pass before the next:
//!
//! 1. structure: `manifests/` and `blobs/` exist and hold at least one file
//! 2. integrity: recompute the sibling checksum file, if any, and compare
//! 3. conflicts: no backed-up file may already exist in the store (not run under force)
//! 4. files: copy blobs, then manifests, into the store; nothing is deleted
//!
//! [`RestoreEngine::plan`] runs stages 1-3 and [`RestoreEngine::apply`] runs
//! stage 4, so a caller can ask for confirmation in between.

use crate::error::{VaultError, VaultResult};
use crate::integrity::{ChecksumStatus, verify_backup_checksum};
use crate::metrics;
use crate::store::fs_util::{copy_file, has_any_file};
use crate::store::{ModelSpec, StoreLayout};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Who asked for the restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// Explicit operator command; force may override checksum failures
    Manual,
    /// Fallback during unattended install; checksum failures are never overridden
    Auto,
}

impl RestoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreMode::Manual => "manual",
            RestoreMode::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    pub force: bool,
    pub mode: RestoreMode,
}

impl RestoreOptions {
    pub fn manual(force: bool) -> Self {
        Self {
            force,
            mode: RestoreMode::Manual,
        }
    }

    pub fn auto(force: bool) -> Self {
        Self {
            force,
            mode: RestoreMode::Auto,
        }
    }

    fn overrides_integrity(&self) -> bool {
        self.force && self.mode == RestoreMode::Manual
    }
}

/// Result of the integrity stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Verified,
    /// No checksum file; restore proceeds with a warning
    Unverified,
    /// Checksum mismatched and force overrode it
    Overridden(Vec<String>),
}

/// A validated restore, ready to apply
#[derive(Debug, Clone, Serialize)]
pub struct RestorePlan {
    pub backup_dir: PathBuf,
    /// Paths relative to both the backup dir and the models dir, blobs first
    pub files: Vec<PathBuf>,
    /// Models whose manifests the backup contains
    pub specs: Vec<ModelSpec>,
    pub integrity: IntegrityStatus,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub options: RestoreOptions,
}

/// What a restore wrote
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub backup_dir: PathBuf,
    pub specs: Vec<ModelSpec>,
    pub files_restored: usize,
    pub files_overwritten: usize,
    pub warnings: Vec<String>,
}

/// Restores backup directories into the store described by a [`StoreLayout`]
pub struct RestoreEngine {
    layout: StoreLayout,
}

impl RestoreEngine {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Validate, then copy
    pub fn restore(&self, backup_dir: &Path, opts: RestoreOptions) -> VaultResult<RestoreReport> {
        let result = self.plan(backup_dir, opts).and_then(|plan| self.apply(&plan));
        metrics::record_restore(opts.mode.as_str(), result.is_ok());
        result
    }

    /// Run the structure, integrity and conflict stages
    pub fn plan(&self, backup_dir: &Path, opts: RestoreOptions) -> VaultResult<RestorePlan> {
        let mut warnings = Vec::new();

        self.validate_structure(backup_dir)?;

        let integrity = match verify_backup_checksum(backup_dir) {
            Ok(ChecksumStatus::Matched) => IntegrityStatus::Verified,
            Ok(ChecksumStatus::Absent) => {
                tracing::warn!(backup = ?backup_dir, "No checksum file, restoring unverified backup");
                warnings.push(
                    "Backup has no checksum file; integrity could not be verified".to_string(),
                );
                IntegrityStatus::Unverified
            }
            Err(VaultError::ChecksumMismatch { entries, .. }) if opts.overrides_integrity() => {
                tracing::warn!(
                    backup = ?backup_dir,
                    mismatched = entries.len(),
                    "Checksum mismatch overridden by force"
                );
                warnings.push(format!(
                    "Checksum mismatch in {} file(s) overridden by --force",
                    entries.len()
                ));
                IntegrityStatus::Overridden(entries)
            }
            Err(e) => return Err(e),
        };

        let files = collect_files(backup_dir)?;
        let specs = self.specs_in(backup_dir, &files);
        if specs.is_empty() {
            warnings.push("No recognisable model manifest found in backup".to_string());
        }

        if opts.force {
            tracing::info!(backup = ?backup_dir, "Conflict check skipped under force");
            warnings.push(
                "Conflict check skipped under force; existing store files will be overwritten"
                    .to_string(),
            );
        } else {
            let conflicts = self.conflicting_files(&files);
            if !conflicts.is_empty() {
                tracing::warn!(
                    backup = ?backup_dir,
                    conflicts = conflicts.len(),
                    "Restore conflicts with existing store files"
                );
                return Err(VaultError::Conflict {
                    paths: conflicts
                        .iter()
                        .map(|rel| self.layout.models_dir().join(rel))
                        .collect(),
                });
            }
        }

        Ok(RestorePlan {
            backup_dir: backup_dir.to_path_buf(),
            files,
            specs,
            integrity,
            warnings,
            options: opts,
        })
    }

    /// Copy every planned file into the store
    pub fn apply(&self, plan: &RestorePlan) -> VaultResult<RestoreReport> {
        let models_dir = self.layout.models_dir();
        tracing::info!(
            backup = ?plan.backup_dir,
            files = plan.files.len(),
            models_dir = ?models_dir,
            "Restoring files"
        );

        let mut files_overwritten = 0;
        for rel in &plan.files {
            let to = models_dir.join(rel);
            if to.exists() {
                files_overwritten += 1;
            }
            copy_file(&plan.backup_dir.join(rel), &to)?;
            tracing::debug!(file = ?rel, "Restored");
        }

        tracing::info!(
            backup = ?plan.backup_dir,
            models = ?plan.specs.iter().map(|s| s.key()).collect::<Vec<_>>(),
            "Restore complete"
        );

        Ok(RestoreReport {
            backup_dir: plan.backup_dir.clone(),
            specs: plan.specs.clone(),
            files_restored: plan.files.len(),
            files_overwritten,
            warnings: plan.warnings.clone(),
        })
    }

    fn validate_structure(&self, backup_dir: &Path) -> VaultResult<()> {
        if !backup_dir.is_dir() {
            return Err(VaultError::BackupNotFound(backup_dir.to_path_buf()));
        }

        let invalid = |reason: &str| VaultError::InvalidBackupStructure {
            path: backup_dir.to_path_buf(),
            reason: reason.to_string(),
        };
        let manifests = backup_dir.join("manifests");
        let blobs = backup_dir.join("blobs");
        if !manifests.is_dir() {
            return Err(invalid("manifests/ directory missing"));
        }
        if !blobs.is_dir() {
            return Err(invalid("blobs/ directory missing"));
        }
        if !has_any_file(&manifests) && !has_any_file(&blobs) {
            return Err(invalid("backup contains no files"));
        }
        Ok(())
    }

    fn specs_in(&self, backup_dir: &Path, files: &[PathBuf]) -> Vec<ModelSpec> {
        let mut specs: Vec<ModelSpec> = files
            .iter()
            .filter_map(|rel| rel.strip_prefix("manifests").ok())
            .filter_map(|rel| {
                let spec = self.layout.spec_from_manifest(rel);
                if spec.is_none() {
                    tracing::debug!(backup = ?backup_dir, path = ?rel, "Unrecognised manifest path");
                }
                spec
            })
            .collect();
        specs.sort();
        specs.dedup();
        specs
    }

    /// Single pass over the planned files; anything that cannot be proven absent counts
    fn conflicting_files(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        let models_dir = self.layout.models_dir();
        files
            .iter()
            .filter(|rel| match std::fs::symlink_metadata(models_dir.join(rel)) {
                Ok(_) => true,
                Err(e) => e.kind() != std::io::ErrorKind::NotFound,
            })
            .cloned()
            .collect()
    }
}

/// Regular files under `blobs/` then `manifests/`, relative to the backup dir
fn collect_files(backup_dir: &Path) -> VaultResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for sub in ["blobs", "manifests"] {
        let mut subtree = Vec::new();
        for entry in WalkDir::new(backup_dir.join(sub)).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(backup_dir).to_path_buf();
                VaultError::io_with_path(e.into(), path)
            })?;
            if entry.file_type().is_symlink() {
                tracing::warn!(path = ?entry.path(), "Skipping symlink in backup");
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(backup_dir) {
                subtree.push(rel.to_path_buf());
            }
        }
        subtree.sort();
        files.extend(subtree);
    }
    Ok(files)
}
