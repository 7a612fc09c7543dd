//! On-disk layout of the model store
//!
//! ```text
//! models/
//! ├── manifests/
//! │   ├── registry.ollama.ai/
//! │   │   ├── library/llama2/7b          (bare name)
//! │   │   └── user/repo/q4               (namespaced name)
//! │   └── hf.co/user/repo/Q4_K_M         (remote origin)
//! └── blobs/
//!     └── sha256-<hex>
//! ```
//!
//! Every other component resolves paths through [`StoreLayout`] so the
//! layout rules live in exactly one place.

use super::manifest::BlobDigest;
use super::spec::ModelSpec;
use crate::error::{VaultError, VaultResult};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Registry root used for bare and namespaced names
pub const DEFAULT_REGISTRY_HOST: &str = "registry.ollama.ai";

/// Origins whose names already carry their own host segment
pub const DEFAULT_REMOTE_ORIGINS: &[&str] = &["hf.co", "huggingface.co"];

/// Namespace used for bare model names
const LIBRARY_NAMESPACE: &str = "library";

/// Upper bound for display aliases
const ALIAS_MAX_LEN: usize = 40;

/// How [`safe_name`] transforms a spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeNameMode {
    /// `/` and `:` become `_` (backup directory names)
    Backup,
    /// `/` becomes `_`, other characters illegal on common filesystems become `-`
    Filesystem,
    /// Lowercase alphanumerics joined by `-`, length bounded
    Alias,
}

/// Which rule produced a manifest path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutRule {
    RemoteOrigin,
    Namespaced,
    Library,
}

/// Resolves model specs to manifest and blob paths inside a store
#[derive(Debug, Clone)]
pub struct StoreLayout {
    models_dir: PathBuf,
    registry_host: String,
    remote_origins: Vec<String>,
}

impl StoreLayout {
    /// Layout with the default registry host and remote origins
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            registry_host: DEFAULT_REGISTRY_HOST.to_string(),
            remote_origins: DEFAULT_REMOTE_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
        }
    }

    pub fn with_registry(
        models_dir: impl Into<PathBuf>,
        registry_host: impl Into<String>,
        remote_origins: Vec<String>,
    ) -> Self {
        Self {
            models_dir: models_dir.into(),
            registry_host: registry_host.into(),
            remote_origins,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.models_dir.join("manifests")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.models_dir.join("blobs")
    }

    /// Pick the layout rule for a model name
    pub fn rule_for(&self, spec: &ModelSpec) -> LayoutRule {
        let name = spec.name();
        match name.split_once('/') {
            Some((first, _)) if self.is_remote_origin(first) => LayoutRule::RemoteOrigin,
            Some(_) => LayoutRule::Namespaced,
            None => LayoutRule::Library,
        }
    }

    /// Manifest path relative to `models/`
    pub fn manifest_rel_path(&self, spec: &ModelSpec) -> PathBuf {
        let mut path = PathBuf::from("manifests");
        match self.rule_for(spec) {
            LayoutRule::RemoteOrigin => {}
            LayoutRule::Namespaced => path.push(&self.registry_host),
            LayoutRule::Library => {
                path.push(&self.registry_host);
                path.push(LIBRARY_NAMESPACE);
            }
        }
        for segment in spec.name().split('/') {
            path.push(segment);
        }
        path.push(spec.tag());
        path
    }

    /// Absolute manifest path for a spec
    pub fn manifest_path(&self, spec: &ModelSpec) -> PathBuf {
        self.models_dir.join(self.manifest_rel_path(spec))
    }

    /// Blob path relative to `models/`
    pub fn blob_rel_path(&self, digest: &BlobDigest) -> PathBuf {
        Path::new("blobs").join(digest.file_name())
    }

    pub fn blob_path(&self, digest: &BlobDigest) -> PathBuf {
        self.models_dir.join(self.blob_rel_path(digest))
    }

    /// Map a manifest path (relative to `manifests/`) back to its spec
    pub fn spec_from_manifest(&self, rel: &Path) -> Option<ModelSpec> {
        let segments: Vec<&str> = rel
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        let (tag, parents) = segments.split_last()?;
        let name = match parents {
            [host, LIBRARY_NAMESPACE, bare] if *host == self.registry_host => bare.to_string(),
            [host, rest @ ..] if *host == self.registry_host && !rest.is_empty() => rest.join("/"),
            [origin, rest @ ..] if self.is_remote_origin(origin) && !rest.is_empty() => {
                parents.join("/")
            }
            _ => return None,
        };

        ModelSpec::new(name, *tag).ok()
    }

    /// Every spec that has a manifest in the store, sorted
    pub fn installed_specs(&self) -> VaultResult<Vec<ModelSpec>> {
        let manifests_dir = self.manifests_dir();
        if !manifests_dir.exists() {
            return Ok(Vec::new());
        }

        let mut specs = Vec::new();
        for entry in WalkDir::new(&manifests_dir) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(manifests_dir.as_path()).to_path_buf();
                VaultError::io_with_path(e.into(), path)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&manifests_dir) else {
                continue;
            };
            match self.spec_from_manifest(rel) {
                Some(spec) => specs.push(spec),
                None => tracing::debug!(path = ?entry.path(), "Skipping unrecognised manifest path"),
            }
        }

        specs.sort();
        specs.dedup();
        Ok(specs)
    }

    fn is_remote_origin(&self, segment: &str) -> bool {
        self.remote_origins
            .iter()
            .any(|origin| origin.eq_ignore_ascii_case(segment))
    }
}

/// Deterministic, filesystem-safe identifier for a spec; never fails
pub fn safe_name(spec: &ModelSpec, mode: SafeNameMode) -> String {
    let display = spec.to_string();
    match mode {
        SafeNameMode::Backup => display.replace(['/', ':'], "_"),
        SafeNameMode::Filesystem => display
            .chars()
            .map(|c| match c {
                '/' => '_',
                '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
                c if c.is_control() => '-',
                c => c,
            })
            .collect(),
        SafeNameMode::Alias => alias(&display),
    }
}

fn alias(display: &str) -> String {
    let mut out = String::with_capacity(display.len());
    for c in display.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.truncate(ALIAS_MAX_LEN);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "model".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> ModelSpec {
        ModelSpec::parse(s).unwrap()
    }

    #[test]
    fn test_library_path() {
        let layout = StoreLayout::new("/m");
        assert_eq!(
            layout.manifest_path(&spec("llama2:7b")),
            PathBuf::from("/m/manifests/registry.ollama.ai/library/llama2/7b")
        );
        assert_eq!(layout.rule_for(&spec("llama2:7b")), LayoutRule::Library);
    }

    #[test]
    fn test_namespaced_path() {
        let layout = StoreLayout::new("/m");
        assert_eq!(
            layout.manifest_path(&spec("user/repo:q4")),
            PathBuf::from("/m/manifests/registry.ollama.ai/user/repo/q4")
        );
    }

    #[test]
    fn test_remote_origin_path() {
        let layout = StoreLayout::new("/m");
        let s = spec("hf.co/bartowski/Llama-GGUF:Q4_K_M");
        assert_eq!(layout.rule_for(&s), LayoutRule::RemoteOrigin);
        assert_eq!(
            layout.manifest_path(&s),
            PathBuf::from("/m/manifests/hf.co/bartowski/Llama-GGUF/Q4_K_M")
        );
    }

    #[test]
    fn test_custom_registry_host() {
        let layout = StoreLayout::with_registry("/m", "registry.local", vec![]);
        assert_eq!(
            layout.manifest_rel_path(&spec("demo:1b")),
            PathBuf::from("manifests/registry.local/library/demo/1b")
        );
        // hf.co is not recognised without being configured
        assert_eq!(
            layout.rule_for(&spec("hf.co/user/repo:1")),
            LayoutRule::Namespaced
        );
    }

    #[test]
    fn test_spec_from_manifest_inverts_resolution() {
        let layout = StoreLayout::new("/m");
        for s in ["llama2:7b", "user/repo:q4", "hf.co/user/repo:Q4_K_M"] {
            let s = spec(s);
            let rel = layout.manifest_rel_path(&s);
            let rel = rel.strip_prefix("manifests").unwrap();
            assert_eq!(layout.spec_from_manifest(rel), Some(s));
        }
    }

    #[test]
    fn test_spec_from_manifest_rejects_unknown_host() {
        let layout = StoreLayout::new("/m");
        assert_eq!(
            layout.spec_from_manifest(Path::new("example.com/a/b")),
            None
        );
        assert_eq!(layout.spec_from_manifest(Path::new("tag")), None);
    }

    #[test]
    fn test_installed_specs_scans_manifests() {
        let temp_dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(temp_dir.path());
        for s in ["b:1", "a:2", "user/repo:q4"] {
            let path = layout.manifest_path(&spec(s));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "{}").unwrap();
        }

        let specs = layout.installed_specs().unwrap();
        let names: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["a:2", "b:1", "user/repo:q4"]);
    }

    #[test]
    fn test_installed_specs_missing_dir() {
        let layout = StoreLayout::new("/nonexistent/models-12345");
        assert!(layout.installed_specs().unwrap().is_empty());
    }

    #[test]
    fn test_safe_name_backup() {
        assert_eq!(safe_name(&spec("demo:1b"), SafeNameMode::Backup), "demo_1b");
        assert_eq!(
            safe_name(&spec("hf.co/user/repo:Q4"), SafeNameMode::Backup),
            "hf.co_user_repo_Q4"
        );
    }

    #[test]
    fn test_safe_name_filesystem() {
        assert_eq!(
            safe_name(&spec("user/repo:q4"), SafeNameMode::Filesystem),
            "user_repo-q4"
        );
    }

    #[test]
    fn test_safe_name_alias() {
        assert_eq!(
            safe_name(&spec("hf.co/User/Repo:Q4_K_M"), SafeNameMode::Alias),
            "hf-co-user-repo-q4-k-m"
        );
        let long = spec(&format!("{}:1", "a".repeat(100)));
        assert!(safe_name(&long, SafeNameMode::Alias).len() <= ALIAS_MAX_LEN);
        assert_eq!(safe_name(&spec("___:__"), SafeNameMode::Alias), "model");
    }
}
