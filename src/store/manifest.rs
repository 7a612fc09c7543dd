//! Manifest parsing and blob digest extraction
//!
//! Manifests follow the OCI image manifest shape written by the model runtime:
//!
//! ```json
//! {
//!   "schemaVersion": 2,
//!   "config": { "mediaType": "...", "digest": "sha256:<hex>", "size": 485 },
//!   "layers": [ { "mediaType": "...", "digest": "sha256:<hex>", "size": 1321082688 } ]
//! }
//! ```

use crate::error::{VaultError, VaultResult};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

const DIGEST_PREFIX: &str = "sha256:";
const BLOB_FILE_PREFIX: &str = "sha256-";
const DIGEST_HEX_LEN: usize = 64;

/// A sha256 content hash referenced by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobDigest(String);

impl BlobDigest {
    /// Accepts `sha256:<hex>`, `sha256-<hex>` or bare `<hex>`
    pub fn parse(value: &str) -> Option<Self> {
        let hex = value
            .strip_prefix(DIGEST_PREFIX)
            .or_else(|| value.strip_prefix(BLOB_FILE_PREFIX))
            .unwrap_or(value);

        if hex.len() == DIGEST_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn hex(&self) -> &str {
        &self.0
    }

    /// Name of the blob file inside `blobs/`
    pub fn file_name(&self) -> String {
        format!("{}{}", BLOB_FILE_PREFIX, self.0)
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DIGEST_PREFIX, self.0)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct Descriptor {
    #[serde(default)]
    digest: Option<String>,
}

/// Read a manifest file and return its blob digests, config first then layers
///
/// Duplicate digests are reported once, in first-seen order.
pub fn extract_blob_digests(manifest_path: &Path) -> VaultResult<Vec<BlobDigest>> {
    if !manifest_path.is_file() {
        return Err(VaultError::ManifestNotFound(manifest_path.to_path_buf()));
    }

    let content = std::fs::read_to_string(manifest_path)
        .map_err(|e| VaultError::io_with_path(e, manifest_path))?;

    parse_blob_digests(&content).map_err(|reason| VaultError::ManifestUnparsable {
        path: manifest_path.to_path_buf(),
        reason,
    })
}

/// Parse manifest content; an error string is returned when nothing usable is found
pub fn parse_blob_digests(content: &str) -> Result<Vec<BlobDigest>, String> {
    let document: ManifestDocument =
        serde_json::from_str(content).map_err(|e| format!("invalid JSON: {}", e))?;

    let mut digests: Vec<BlobDigest> = Vec::new();
    let descriptors = document.config.iter().chain(document.layers.iter());
    for raw in descriptors.filter_map(|d| d.digest.as_deref()) {
        match BlobDigest::parse(raw) {
            Some(digest) if !digests.contains(&digest) => digests.push(digest),
            Some(_) => {}
            None => tracing::warn!(digest = %raw, "Ignoring malformed digest in manifest"),
        }
    }

    if digests.is_empty() {
        return Err("manifest references no blob digests".to_string());
    }

    Ok(digests)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_digest_parse_forms() {
        let d = BlobDigest::parse(&format!("sha256:{}", A)).unwrap();
        assert_eq!(d.hex(), A);
        assert_eq!(d.file_name(), format!("sha256-{}", A));
        assert_eq!(d.to_string(), format!("sha256:{}", A));
        assert_eq!(BlobDigest::parse(&format!("sha256-{}", A)), Some(d.clone()));
        assert_eq!(BlobDigest::parse(A), Some(d));
    }

    #[test]
    fn test_digest_parse_rejects_bad_hex() {
        assert!(BlobDigest::parse("sha256:xyz").is_none());
        assert!(BlobDigest::parse(&format!("sha256:{}0", A)).is_none());
        assert!(BlobDigest::parse(&"g".repeat(64)).is_none());
    }

    #[test]
    fn test_parse_config_and_layers() {
        let content = format!(
            r#"{{"schemaVersion":2,"config":{{"digest":"sha256:{A}"}},"layers":[{{"digest":"sha256:{B}"}}]}}"#
        );
        let digests = parse_blob_digests(&content).unwrap();
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[0].hex(), A);
        assert_eq!(digests[1].hex(), B);
    }

    #[test]
    fn test_parse_ignores_key_order_and_dedups() {
        let content = format!(
            r#"{{"layers":[{{"size":1,"digest":"sha256:{B}"}},{{"digest":"sha256:{B}"}}],"config":{{"digest":"sha256:{A}","size":2}}}}"#
        );
        let digests = parse_blob_digests(&content).unwrap();
        assert_eq!(digests.iter().map(|d| d.hex()).collect::<Vec<_>>(), vec![A, B]);
    }

    #[test]
    fn test_parse_zero_layers_with_config() {
        let content = format!(r#"{{"config":{{"digest":"sha256:{A}"}}}}"#);
        assert_eq!(parse_blob_digests(&content).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_empty_manifest_is_error() {
        assert!(parse_blob_digests("{}").is_err());
        assert!(parse_blob_digests(r#"{"layers":[]}"#).is_err());
        assert!(parse_blob_digests("not json").is_err());
    }

    #[test]
    fn test_extract_missing_file() {
        let err = extract_blob_digests(Path::new("/nonexistent/manifest-12345")).unwrap_err();
        assert!(matches!(err, VaultError::ManifestNotFound(_)));
    }

    #[test]
    fn test_extract_truncated_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("7b");
        std::fs::write(&path, r#"{"config":{"dig"#).unwrap();
        let err = extract_blob_digests(&path).unwrap_err();
        assert!(matches!(err, VaultError::ManifestUnparsable { .. }));
    }
}
