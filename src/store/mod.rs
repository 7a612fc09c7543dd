//! Model store primitives
//!
//! Provides functionality for:
//! - Parsing model specs (`name:tag`)
//! - Resolving manifest and blob paths for the store layout
//! - Extracting blob digests from manifests
//! - Computing whole-directory checksum manifests
//! - Guarded file removal and copying

pub mod checksum;
pub mod fs_util;
pub mod layout;
pub mod manifest;
pub mod spec;

pub use checksum::{ChecksumManifest, checksum_path_for, hash_file};
pub use layout::{LayoutRule, SafeNameMode, StoreLayout, safe_name};
pub use manifest::{BlobDigest, extract_blob_digests};
pub use spec::ModelSpec;
