//! Error types for store, backup and restore operations

use std::path::PathBuf;
use thiserror::Error;

/// Library result alias
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors raised by the integrity, backup and restore engines
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid model spec '{input}': {reason}")]
    InvalidSpec { input: String, reason: &'static str },

    #[error("Manifest not found: {0:?}")]
    ManifestNotFound(PathBuf),

    #[error("Manifest {path:?} could not be parsed: {reason}")]
    ManifestUnparsable { path: PathBuf, reason: String },

    #[error("Model {model} is incomplete ({missing} missing blob(s))")]
    SourceIncomplete { model: String, missing: usize },

    #[error("Backup not found: {0:?}")]
    BackupNotFound(PathBuf),

    #[error("Invalid backup structure at {path:?}: {reason}")]
    InvalidBackupStructure { path: PathBuf, reason: String },

    #[error("Checksum mismatch for backup {path:?} ({} differing entries)", .entries.len())]
    ChecksumMismatch { path: PathBuf, entries: Vec<String> },

    #[error("{} file(s) already exist in the model store", .paths.len())]
    Conflict { paths: Vec<PathBuf> },

    #[error("Failed to copy {from:?} to {to:?}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write checksum file {path:?}: {source}")]
    ChecksumWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to operate on unsafe path {0:?}")]
    UnsafePath(PathBuf),

    #[error("Model runtime error: {0}")]
    Runtime(String),

    #[error("Operation cancelled by user")]
    Cancelled,
}

/// Coarse failure classes used to decide recovery paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Manifest or backup absent; callers fall back to another source
    NotFound,
    /// Blobs missing; recoverable by re-download
    Incomplete,
    /// Recoverable only with explicit force
    ChecksumMismatch,
    /// Recoverable only with explicit force
    Conflict,
    /// Fatal for the current operation
    CopyFailed,
    /// Malformed input or layout
    Invalid,
    Runtime,
    Cancelled,
}

impl VaultError {
    /// Wrap an IO error with the path it occurred on
    pub fn io_with_path(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VaultError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::ManifestNotFound(_) | VaultError::BackupNotFound(_) => ErrorKind::NotFound,
            VaultError::ManifestUnparsable { .. } | VaultError::SourceIncomplete { .. } => {
                ErrorKind::Incomplete
            }
            VaultError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            VaultError::Conflict { .. } => ErrorKind::Conflict,
            VaultError::CopyFailed { .. }
            | VaultError::ChecksumWriteFailed { .. }
            | VaultError::Io { .. } => ErrorKind::CopyFailed,
            VaultError::InvalidSpec { .. }
            | VaultError::InvalidBackupStructure { .. }
            | VaultError::UnsafePath(_) => ErrorKind::Invalid,
            VaultError::Runtime(_) => ErrorKind::Runtime,
            VaultError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether an explicit force flag can override this failure
    pub fn is_forceable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ChecksumMismatch | ErrorKind::Conflict
        )
    }

    /// Operator-facing hint for fixing the failure
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            VaultError::ManifestNotFound(_) => {
                Some("Install the model first, or restore it from a backup")
            }
            VaultError::SourceIncomplete { .. } | VaultError::ManifestUnparsable { .. } => {
                Some("Re-download the model to repair missing blobs before backing it up")
            }
            VaultError::BackupNotFound(_) => {
                Some("Pass the inner backup directory (<root>/<name>/<name>)")
            }
            VaultError::InvalidBackupStructure { .. } => {
                Some("The backup must contain manifests/ and blobs/; re-run backup to recreate it")
            }
            VaultError::ChecksumMismatch { .. } => Some(
                "The backup was modified or corrupted; re-run backup to regenerate checksum file, \
                 or pass --force to restore anyway",
            ),
            VaultError::Conflict { .. } => {
                Some("Files already exist in the store; pass --force to overwrite them")
            }
            VaultError::ChecksumWriteFailed { .. } => {
                Some("Re-run backup to regenerate checksum file")
            }
            VaultError::CopyFailed { .. } | VaultError::Io { .. } => {
                Some("Check free disk space and permissions, then retry")
            }
            _ => None,
        }
    }
}
