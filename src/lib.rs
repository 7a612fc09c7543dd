//! Model Vault - integrity, backup and restore for a local model store
//!
//! Verifies that models in an Ollama-style store (`manifests/` + content-addressed
//! `blobs/`) are complete, makes checksummed backups of them, and restores those
//! backups without clobbering the live store unless asked to.

pub mod backup;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod existence;
pub mod integrity;
pub mod lifecycle;
pub mod metrics;
pub mod restore;
pub mod runtime;
pub mod store;

pub use backup::{BackupEngine, BackupRecord, BackupStatus};
pub use cleanup::{CleanupRegistry, CleanupTask};
pub use config::{RuntimeConfig, RuntimeMode, VaultConfig};
pub use error::{ErrorKind, VaultError, VaultResult};
pub use existence::ExistenceCache;
pub use integrity::{Confidence, IntegrityChecker, VerifyOptions, VerifyResult, VerifyTarget};
pub use lifecycle::{BatchReport, EnsureOptions, LifecycleState, ModelLifecycle, ModelOutcome};
pub use restore::{RestoreEngine, RestoreMode, RestoreOptions, RestorePlan, RestoreReport};
pub use runtime::{CommandRuntime, ModelRuntime};
pub use store::{ModelSpec, SafeNameMode, StoreLayout};
