//! Checksummed backups of a single model
//!
//! Layout for a backup root `R` and model `demo:1b`:
//!
//! ```text
//! R/demo_1b/
//! ├── demo_1b/                 mirrors models/ for this model only
//! │   ├── manifests/registry.ollama.ai/library/demo/1b
//! │   └── blobs/sha256-<hex>...
//! ├── demo_1b.checksum         "<sha256>  <relative-path>" per file, sorted
//! └── demo_1b_info.txt         human-readable report
//! ```

use crate::error::{VaultError, VaultResult};
use crate::integrity::{IntegrityChecker, VerifyOptions};
use crate::metrics;
use crate::store::checksum::{ChecksumManifest, checksum_path_for, sibling_with_suffix};
use crate::store::fs_util::{copy_file, remove_dir_all_guarded};
use crate::store::{ModelSpec, SafeNameMode, safe_name};
use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suffix of the report written next to a backup directory
pub const INFO_SUFFIX: &str = "_info.txt";

/// How a backup request ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum BackupStatus {
    Created,
    /// The directory already existed; nothing was copied
    AlreadyExists,
    /// Files were copied but the checksum or report could not be written
    Degraded(String),
}

/// A backup of one model under one backup root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub spec: ModelSpec,
    pub directory: PathBuf,
    pub checksum_manifest: PathBuf,
    pub info_file: PathBuf,
    pub status: BackupStatus,
}

impl BackupRecord {
    /// Paths a backup of `spec` occupies under `backup_root`
    pub fn locate(spec: &ModelSpec, backup_root: &Path) -> Self {
        let name = safe_name(spec, SafeNameMode::Backup);
        let directory = backup_root.join(&name).join(&name);
        Self {
            spec: spec.clone(),
            checksum_manifest: checksum_path_for(&directory),
            info_file: sibling_with_suffix(&directory, INFO_SUFFIX),
            directory,
            status: BackupStatus::AlreadyExists,
        }
    }
}

/// Copies verified models into backup directories
pub struct BackupEngine {
    checker: Arc<IntegrityChecker>,
}

impl BackupEngine {
    pub fn new(checker: Arc<IntegrityChecker>) -> Self {
        Self { checker }
    }

    /// Back up a complete model; an existing backup directory is left untouched
    pub fn backup(&self, spec: &ModelSpec, backup_root: &Path) -> VaultResult<BackupRecord> {
        let result = self.backup_inner(spec, backup_root);
        metrics::record_backup(result.is_ok());
        result
    }

    fn backup_inner(&self, spec: &ModelSpec, backup_root: &Path) -> VaultResult<BackupRecord> {
        let layout = self.checker.layout();
        let manifest_path = layout.manifest_path(spec);
        if !manifest_path.is_file() {
            return Err(VaultError::ManifestNotFound(manifest_path));
        }

        let verification = self.checker.verify_model(spec, VerifyOptions::default());
        if !verification.complete {
            return Err(VaultError::SourceIncomplete {
                model: spec.key(),
                missing: verification.problems.len(),
            });
        }

        let mut record = BackupRecord::locate(spec, backup_root);
        if record.directory.exists() {
            // safe names can collide (`a/b:c`, `a_b:c`); only our own manifest counts
            if !record.directory.join(layout.manifest_rel_path(spec)).is_file() {
                tracing::warn!(
                    model = %spec,
                    backup = ?record.directory,
                    "Backup directory holds a different model"
                );
                return Err(VaultError::InvalidBackupStructure {
                    path: record.directory,
                    reason: format!("directory does not contain a manifest for {}", spec),
                });
            }
            tracing::info!(
                model = %spec,
                backup = ?record.directory,
                "Backup already exists, skipping"
            );
            return Ok(record);
        }

        let mut files = vec![layout.manifest_rel_path(spec)];
        files.extend(self.checker.blob_paths(spec, true)?.iter().cloned());

        tracing::info!(
            model = %spec,
            backup = ?record.directory,
            files = files.len(),
            "Creating backup"
        );

        if let Err(e) = copy_all(layout.models_dir(), &record.directory, &files) {
            tracing::error!(model = %spec, error = %e, "Backup copy failed, removing partial backup");
            if let Err(cleanup_err) = remove_partial(&record.directory) {
                tracing::warn!(error = %cleanup_err, "Failed to remove partial backup");
            }
            return Err(e);
        }

        record.status = BackupStatus::Created;
        let checksums = match ChecksumManifest::compute(&record.directory)
            .and_then(|m| m.write(&record.checksum_manifest).map(|_| m))
        {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(
                    model = %spec,
                    error = %e,
                    "Backup created without checksum file"
                );
                record.status = BackupStatus::Degraded(e.to_string());
                None
            }
        };

        let report = render_report(&record, layout.models_dir(), &files, checksums.as_ref());
        if let Err(e) = std::fs::write(&record.info_file, report) {
            tracing::warn!(path = ?record.info_file, error = %e, "Failed to write backup report");
            if record.status == BackupStatus::Created {
                record.status = BackupStatus::Degraded(format!("report not written: {}", e));
            }
        }

        tracing::info!(model = %spec, status = ?record.status, "Backup finished");
        Ok(record)
    }
}

fn copy_all(models_dir: &Path, dest: &Path, files: &[PathBuf]) -> VaultResult<()> {
    for rel in files {
        let from = models_dir.join(rel);
        let to = dest.join(rel);
        let bytes = copy_file(&from, &to)?;
        tracing::debug!(file = ?rel, bytes, "Copied");
    }
    Ok(())
}

/// Remove a partially written backup and its container if that is now empty
fn remove_partial(directory: &Path) -> VaultResult<()> {
    remove_dir_all_guarded(directory)?;
    if let Some(parent) = directory.parent() {
        let _ = std::fs::remove_dir(parent);
    }
    Ok(())
}

fn render_report(
    record: &BackupRecord,
    models_dir: &Path,
    files: &[PathBuf],
    checksums: Option<&ChecksumManifest>,
) -> String {
    let sizes: Vec<u64> = files
        .iter()
        .map(|rel| {
            std::fs::metadata(record.directory.join(rel))
                .map(|m| m.len())
                .unwrap_or(0)
        })
        .collect();
    let total: u64 = sizes.iter().sum();

    let mut out = String::new();
    let _ = writeln!(out, "Model backup report");
    let _ = writeln!(out, "===================");
    let _ = writeln!(out, "Model:    {}", record.spec);
    let _ = writeln!(out, "Created:  {}", Utc::now().to_rfc3339());
    let _ = writeln!(out, "Source:   {}", models_dir.display());
    let _ = writeln!(out, "Backup:   {}", record.directory.display());
    let _ = writeln!(out, "Files:    {} ({})", files.len(), format_bytes(total));
    let _ = writeln!(out);

    let _ = writeln!(out, "Files");
    let _ = writeln!(out, "-----");
    for (rel, size) in files.iter().zip(&sizes) {
        let _ = writeln!(out, "  {}  ({})", rel.display(), format_bytes(*size));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Checksums (sha256)");
    let _ = writeln!(out, "------------------");
    match checksums {
        Some(manifest) => {
            let _ = writeln!(out, "Stored in {}", record.checksum_manifest.display());
            out.push_str(&manifest.render());
        }
        None => {
            let _ = writeln!(
                out,
                "Checksum file could not be written; re-run backup to regenerate checksum file."
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Restore");
    let _ = writeln!(out, "-------");
    let _ = writeln!(out, "  model-vault verify-backup {}", record.directory.display());
    let _ = writeln!(out, "  model-vault restore {}", record.directory.display());
    let _ = writeln!(
        out,
        "Add --force to restore over files that already exist in the store."
    );
    out
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::verify_backup_checksum;
    use crate::store::StoreLayout;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: BackupEngine,
        checker: Arc<IntegrityChecker>,
        backups: PathBuf,
        spec: ModelSpec,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("models"));
        let spec = ModelSpec::parse("demo:1b").unwrap();
        let manifest = layout.manifest_path(&spec);
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(
            &manifest,
            format!(
                r#"{{"config":{{"digest":"sha256:{A}"}},"layers":[{{"digest":"sha256:{B}"}}]}}"#
            ),
        )
        .unwrap();
        std::fs::create_dir_all(layout.blobs_dir()).unwrap();
        std::fs::write(layout.blobs_dir().join(format!("sha256-{A}")), "config").unwrap();
        std::fs::write(layout.blobs_dir().join(format!("sha256-{B}")), "weights").unwrap();

        let checker = Arc::new(IntegrityChecker::new(layout));
        Fixture {
            backups: dir.path().join("backups"),
            engine: BackupEngine::new(checker.clone()),
            checker,
            spec,
            _dir: dir,
        }
    }

    #[test]
    fn test_backup_creates_layout() {
        let f = fixture();
        let record = f.engine.backup(&f.spec, &f.backups).unwrap();

        assert_eq!(record.status, BackupStatus::Created);
        assert_eq!(record.directory, f.backups.join("demo_1b/demo_1b"));
        assert_eq!(
            record.checksum_manifest,
            f.backups.join("demo_1b/demo_1b.checksum")
        );
        assert_eq!(record.info_file, f.backups.join("demo_1b/demo_1b_info.txt"));
        assert!(
            record
                .directory
                .join("manifests/registry.ollama.ai/library/demo/1b")
                .is_file()
        );
        assert!(record.directory.join(format!("blobs/sha256-{A}")).is_file());
        assert!(record.directory.join(format!("blobs/sha256-{B}")).is_file());

        let checksum = std::fs::read_to_string(&record.checksum_manifest).unwrap();
        assert_eq!(checksum.lines().count(), 3);
        assert_eq!(
            verify_backup_checksum(&record.directory).unwrap(),
            crate::integrity::ChecksumStatus::Matched
        );

        let info = std::fs::read_to_string(&record.info_file).unwrap();
        assert!(info.contains("demo:1b"));
        assert!(info.contains("model-vault restore"));
        assert!(info.contains(&checksum));
    }

    #[test]
    fn test_backup_is_idempotent_without_recopy() {
        let f = fixture();
        let first = f.engine.backup(&f.spec, &f.backups).unwrap();
        let marker = first.directory.join(format!("blobs/sha256-{B}"));
        std::fs::write(&marker, "changed-after-backup").unwrap();

        let second = f.engine.backup(&f.spec, &f.backups).unwrap();
        assert_eq!(second.status, BackupStatus::AlreadyExists);
        assert_eq!(second.directory, first.directory);
        assert_eq!(
            std::fs::read_to_string(&marker).unwrap(),
            "changed-after-backup"
        );
    }

    #[test]
    fn test_refuses_incomplete_model() {
        let f = fixture();
        std::fs::remove_file(
            f.checker
                .layout()
                .blobs_dir()
                .join(format!("sha256-{B}")),
        )
        .unwrap();
        let err = f.engine.backup(&f.spec, &f.backups).unwrap_err();
        assert!(matches!(err, VaultError::SourceIncomplete { missing: 1, .. }));
        assert!(!f.backups.join("demo_1b").exists());
    }

    #[test]
    fn test_missing_manifest() {
        let f = fixture();
        let other = ModelSpec::parse("ghost:1").unwrap();
        let err = f.engine.backup(&other, &f.backups).unwrap_err();
        assert!(matches!(err, VaultError::ManifestNotFound(_)));
    }

    #[test]
    fn test_copy_failure_removes_partial_backup() {
        let f = fixture();
        // Populate the blob cache, then remove a blob so the copy fails mid-way
        let verify = f.checker.verify_model(&f.spec, VerifyOptions::default());
        assert!(verify.complete);
        let paths = f.checker.blob_paths(&f.spec, true).unwrap();
        let files: Vec<PathBuf> = std::iter::once(f.checker.layout().manifest_rel_path(&f.spec))
            .chain(paths.iter().cloned())
            .chain(std::iter::once(PathBuf::from("blobs/sha256-missing")))
            .collect();

        let dest = f.backups.join("demo_1b/demo_1b");
        let err = copy_all(f.checker.layout().models_dir(), &dest, &files).unwrap_err();
        assert!(matches!(err, VaultError::CopyFailed { .. }));
        remove_partial(&dest).unwrap();
        assert!(!dest.exists());
        assert!(!f.backups.join("demo_1b").exists());
    }

    #[test]
    fn test_colliding_safe_name_is_not_reported_as_existing() {
        let f = fixture();
        let layout = f.checker.layout();
        let nested = ModelSpec::parse("a/b:c").unwrap();
        let flat = ModelSpec::parse("a_b:c").unwrap();
        for spec in [&nested, &flat] {
            let manifest = layout.manifest_path(spec);
            std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
            std::fs::copy(layout.manifest_path(&f.spec), &manifest).unwrap();
        }

        let first = f.engine.backup(&nested, &f.backups).unwrap();
        assert_eq!(first.status, BackupStatus::Created);
        assert_eq!(first.directory, f.backups.join("a_b_c/a_b_c"));

        let err = f.engine.backup(&flat, &f.backups).unwrap_err();
        assert!(matches!(err, VaultError::InvalidBackupStructure { .. }));
        assert!(first.directory.join(layout.manifest_rel_path(&nested)).is_file());
        assert!(!first.directory.join(layout.manifest_rel_path(&flat)).exists());
    }

    #[test]
    fn test_checksum_write_failure_degrades_backup() {
        let f = fixture();
        let checksum_file = f.backups.join("demo_1b/demo_1b.checksum");
        std::fs::create_dir_all(&checksum_file).unwrap();

        let record = f.engine.backup(&f.spec, &f.backups).unwrap();
        assert!(matches!(record.status, BackupStatus::Degraded(_)));
        assert!(checksum_file.is_dir());
        assert!(
            record
                .directory
                .join("manifests/registry.ollama.ai/library/demo/1b")
                .is_file()
        );
        assert!(record.directory.join(format!("blobs/sha256-{A}")).is_file());
        assert!(record.directory.join(format!("blobs/sha256-{B}")).is_file());

        let info = std::fs::read_to_string(&record.info_file).unwrap();
        assert!(info.contains("re-run backup to regenerate checksum file"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
