//! Per-model lifecycle: check, restore from backup, download, verify
//!
//! ```text
//! Unknown -> Checking -> Present
//!                     -> Missing -> RestoringFromBackup -> Restored
//!                                                       -> RestoreFailed -> Downloading ...
//!                                -> Downloading -> DownloadFailed
//!                                               -> Installed -> VerifyingInstall -> Verified
//!                                                                                -> VerificationFailed
//! ```
//!
//! Models in a batch are processed one at a time. A failure is recorded in
//! that model's report and never stops the batch.

use crate::backup::{BackupEngine, BackupRecord};
use crate::error::{VaultError, VaultResult};
use crate::existence::ExistenceCache;
use crate::integrity::{IntegrityChecker, VerifyOptions};
use crate::metrics;
use crate::restore::{RestoreEngine, RestoreOptions, RestorePlan, RestoreReport};
use crate::runtime::ModelRuntime;
use crate::store::fs_util::{prune_empty_parents, remove_file_guarded};
use crate::store::{ModelSpec, StoreLayout};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle states a model passes through in [`ModelLifecycle::ensure_model`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unknown,
    Checking,
    Present,
    Missing,
    RestoringFromBackup,
    Restored,
    RestoreFailed,
    Downloading,
    Installed,
    DownloadFailed,
    VerifyingInstall,
    Verified,
    VerificationFailed,
}

/// Final result for one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ModelOutcome {
    AlreadyPresent,
    Restored,
    Installed,
    Failed { stage: LifecycleState, error: String },
}

impl ModelOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ModelOutcome::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            ModelOutcome::AlreadyPresent => "present",
            ModelOutcome::Restored => "restored",
            ModelOutcome::Installed => "installed",
            ModelOutcome::Failed { .. } => "failed",
        }
    }
}

/// Everything that happened to one model
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub spec: ModelSpec,
    pub outcome: ModelOutcome,
    pub transitions: Vec<LifecycleState>,
    pub warnings: Vec<String>,
}

impl ModelReport {
    fn new(spec: &ModelSpec) -> Self {
        Self {
            spec: spec.clone(),
            outcome: ModelOutcome::AlreadyPresent,
            transitions: vec![LifecycleState::Unknown],
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        tracing::debug!(model = %self.spec, state = ?state, "Lifecycle transition");
        self.transitions.push(state);
    }

    fn fail(mut self, stage: LifecycleState, error: &VaultError) -> Self {
        self.enter(stage);
        self.outcome = ModelOutcome::Failed {
            stage,
            error: error.to_string(),
        };
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(LifecycleState::Unknown)
    }
}

/// Aggregated outcomes of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub models: Vec<ModelReport>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.models.iter().all(|m| m.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModelReport> {
        self.models.iter().filter(|m| !m.outcome.is_success())
    }

    pub fn count(&self, outcome: &ModelOutcome) -> usize {
        self.models
            .iter()
            .filter(|m| std::mem::discriminant(&m.outcome) == std::mem::discriminant(outcome))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureOptions {
    /// Try the backup root before downloading
    pub auto_restore: bool,
    /// Skip the existence cache and check the store directly
    pub bypass_cache: bool,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            auto_restore: true,
            bypass_cache: false,
        }
    }
}

/// Ties the store, the caches, the engines and the runtime together
pub struct ModelLifecycle {
    checker: Arc<IntegrityChecker>,
    existence: Arc<ExistenceCache>,
    runtime: Arc<dyn ModelRuntime>,
    backups: BackupEngine,
    restores: RestoreEngine,
    backup_root: Option<PathBuf>,
}

impl ModelLifecycle {
    pub fn new(
        layout: StoreLayout,
        runtime: Arc<dyn ModelRuntime>,
        backup_root: Option<PathBuf>,
    ) -> Self {
        let checker = Arc::new(IntegrityChecker::new(layout.clone()));
        Self {
            existence: Arc::new(ExistenceCache::new(runtime.clone())),
            backups: BackupEngine::new(checker.clone()),
            restores: RestoreEngine::new(layout),
            checker,
            runtime,
            backup_root,
        }
    }

    pub fn checker(&self) -> &IntegrityChecker {
        &self.checker
    }

    pub fn layout(&self) -> &StoreLayout {
        self.checker.layout()
    }

    pub fn backup_root(&self) -> Option<&Path> {
        self.backup_root.as_deref()
    }

    /// Drop both process caches after the store changed
    pub async fn invalidate_caches(&self) {
        self.existence.invalidate().await;
        self.checker.invalidate();
    }

    /// Ensure every model in `specs`, in order
    pub async fn ensure_models(&self, specs: &[ModelSpec], opts: EnsureOptions) -> BatchReport {
        let mut report = BatchReport::default();
        for spec in specs {
            let model = self.ensure_model(spec, opts).await;
            if let ModelOutcome::Failed { stage, error } = &model.outcome {
                tracing::error!(model = %spec, stage = ?stage, error = %error, "Model failed, continuing batch");
            }
            report.models.push(model);
        }
        tracing::info!(
            total = report.models.len(),
            failed = report.failed().count(),
            "Batch complete"
        );
        report
    }

    /// Drive one model to present, restoring or downloading as needed
    pub async fn ensure_model(&self, spec: &ModelSpec, opts: EnsureOptions) -> ModelReport {
        let report = self.ensure_model_inner(spec, opts).await;
        metrics::record_install(report.outcome.label());
        report
    }

    async fn ensure_model_inner(&self, spec: &ModelSpec, opts: EnsureOptions) -> ModelReport {
        let mut report = ModelReport::new(spec);
        report.enter(LifecycleState::Checking);

        if self.is_present(spec, opts.bypass_cache).await {
            tracing::info!(model = %spec, "Model already present");
            report.enter(LifecycleState::Present);
            report.outcome = ModelOutcome::AlreadyPresent;
            return report;
        }
        report.enter(LifecycleState::Missing);

        if opts.auto_restore {
            if let Some(dir) = self.auto_restore_source(spec) {
                report.enter(LifecycleState::RestoringFromBackup);
                match self.restore_from(&dir, spec).await {
                    Ok(()) => {
                        tracing::info!(model = %spec, backup = ?dir, "Model restored from backup");
                        report.enter(LifecycleState::Restored);
                        report.outcome = ModelOutcome::Restored;
                        return report;
                    }
                    Err(e) => {
                        tracing::warn!(
                            model = %spec,
                            backup = ?dir,
                            error = %e,
                            "Auto-restore failed, falling back to download"
                        );
                        report.warnings.push(format!("auto-restore failed: {}", e));
                        report.enter(LifecycleState::RestoreFailed);
                    }
                }
            }
        }

        report.enter(LifecycleState::Downloading);
        let pulled = self.runtime.pull(spec).await;
        self.invalidate_caches().await;
        if let Err(e) = pulled {
            return report.fail(LifecycleState::DownloadFailed, &e);
        }
        report.enter(LifecycleState::Installed);

        report.enter(LifecycleState::VerifyingInstall);
        let verification = self.checker.verify_model(spec, VerifyOptions::uncached());
        if verification.complete {
            tracing::info!(model = %spec, "Model installed and verified");
            report.enter(LifecycleState::Verified);
            report.outcome = ModelOutcome::Installed;
            return report;
        }

        let error = VaultError::SourceIncomplete {
            model: spec.key(),
            missing: verification.problems.len(),
        };
        tracing::error!(model = %spec, problems = ?verification.problems, "Installed model failed verification");
        if let Err(e) = self.discard_manifest(spec).await {
            tracing::warn!(model = %spec, error = %e, "Failed to remove unverified manifest");
            report.warnings.push(format!("cleanup failed: {}", e));
        }
        report.fail(LifecycleState::VerificationFailed, &error)
    }

    async fn is_present(&self, spec: &ModelSpec, bypass_cache: bool) -> bool {
        if !bypass_cache && self.existence.exists(&spec.key()).await {
            return true;
        }
        let opts = if bypass_cache {
            VerifyOptions::uncached()
        } else {
            VerifyOptions::default()
        };
        self.checker.verify_model(spec, opts).complete
    }

    fn auto_restore_source(&self, spec: &ModelSpec) -> Option<PathBuf> {
        let root = self.backup_root.as_deref()?;
        let dir = BackupRecord::locate(spec, root).directory;
        if dir.is_dir() {
            Some(dir)
        } else {
            tracing::debug!(model = %spec, backup = ?dir, "No backup to restore from");
            None
        }
    }

    /// Unattended restore: conflicts are overwritten, checksum failures are not
    async fn restore_from(&self, dir: &Path, spec: &ModelSpec) -> VaultResult<()> {
        let opts = RestoreOptions::auto(true);
        let plan = self.restores.plan(dir, opts).and_then(|plan| {
            if plan.specs.contains(spec) {
                Ok(plan)
            } else {
                Err(VaultError::InvalidBackupStructure {
                    path: dir.to_path_buf(),
                    reason: format!("backup does not contain {}", spec),
                })
            }
        });
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                metrics::record_restore(opts.mode.as_str(), false);
                return Err(e);
            }
        };

        let restored = self.restores.apply(&plan);
        self.invalidate_caches().await;
        metrics::record_restore(opts.mode.as_str(), restored.is_ok());
        restored?;

        let verification = self.checker.verify_model(spec, VerifyOptions::uncached());
        if verification.complete {
            Ok(())
        } else {
            Err(VaultError::SourceIncomplete {
                model: spec.key(),
                missing: verification.problems.len(),
            })
        }
    }

    /// Remove a half-installed model's manifest; blobs may be shared and stay
    async fn discard_manifest(&self, spec: &ModelSpec) -> VaultResult<()> {
        let layout = self.checker.layout();
        let manifest = layout.manifest_path(spec);
        let removed = remove_file_guarded(&manifest);
        prune_empty_parents(&manifest, &layout.manifests_dir());
        self.invalidate_caches().await;
        removed
    }

    /// Remove a model through the runtime
    pub async fn remove_model(&self, spec: &ModelSpec) -> VaultResult<()> {
        let removed = self.runtime.remove(spec).await;
        self.invalidate_caches().await;
        removed?;
        tracing::info!(model = %spec, "Model removed");
        Ok(())
    }

    /// Back up one model to `root`, or the configured backup root
    pub fn backup(&self, spec: &ModelSpec, root: Option<&Path>) -> VaultResult<BackupRecord> {
        self.backups.backup(spec, self.resolve_backup_root(root)?)
    }

    /// Back up every model found in the store; one failure does not stop the rest
    pub fn backup_all(
        &self,
        root: Option<&Path>,
    ) -> VaultResult<Vec<(ModelSpec, VaultResult<BackupRecord>)>> {
        let root = self.resolve_backup_root(root)?;
        let specs = self.layout().installed_specs()?;
        tracing::info!(models = specs.len(), backup_root = ?root, "Backing up all models");
        Ok(specs
            .into_iter()
            .map(|spec| {
                let result = self.backups.backup(&spec, root);
                if let Err(e) = &result {
                    tracing::error!(model = %spec, error = %e, "Backup failed");
                }
                (spec, result)
            })
            .collect())
    }

    fn resolve_backup_root<'a>(&'a self, root: Option<&'a Path>) -> VaultResult<&'a Path> {
        root.or(self.backup_root.as_deref()).ok_or_else(|| {
            VaultError::Runtime("No backup directory given and none configured".to_string())
        })
    }

    /// Validate a manual restore without writing anything
    pub fn plan_restore(&self, backup_dir: &Path, force: bool) -> VaultResult<RestorePlan> {
        let opts = RestoreOptions::manual(force);
        let plan = self.restores.plan(backup_dir, opts);
        if plan.is_err() {
            metrics::record_restore(opts.mode.as_str(), false);
        }
        plan
    }

    /// Write a validated plan into the store
    pub async fn apply_restore(&self, plan: &RestorePlan) -> VaultResult<RestoreReport> {
        let result = self.restores.apply(plan);
        self.invalidate_caches().await;
        metrics::record_restore(plan.options.mode.as_str(), result.is_ok());
        result
    }
}
