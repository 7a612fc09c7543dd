//! Configuration structures and loading logic

use crate::store::StoreLayout;
use crate::store::layout::{DEFAULT_REGISTRY_HOST, DEFAULT_REMOTE_ORIGINS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main vault configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    pub models_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    pub registry_host: String,
    pub remote_origins: Vec<String>,
    /// Try restoring from `backup_dir` before downloading a missing model
    pub auto_restore: bool,
    /// Prometheus textfile written at exit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_file: Option<PathBuf>,
    pub runtime: RuntimeConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            backup_dir: None,
            registry_host: DEFAULT_REGISTRY_HOST.to_string(),
            remote_origins: default_remote_origins(),
            auto_restore: true,
            metrics_file: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Where the model runtime executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Runtime binary on the host
    Local,
    /// Runtime binary inside a container with the store bind-mounted
    Container,
}

impl std::str::FromStr for RuntimeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "container" => Ok(Self::Container),
            other => anyhow::bail!("Unknown runtime mode '{}' (expected local or container)", other),
        }
    }
}

/// Runtime collaborator settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mode: RuntimeMode,
    pub binary: String,
    pub container_engine: String,
    pub container_name: String,
    pub image: String,
    /// Path of the store inside the container
    pub container_models_dir: String,
    pub startup_timeout_secs: u64,
    pub list_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Local,
            binary: default_runtime_binary(),
            container_engine: "docker".to_string(),
            container_name: "model-vault-runtime".to_string(),
            image: "ollama/ollama:latest".to_string(),
            container_models_dir: "/root/.ollama/models".to_string(),
            startup_timeout_secs: 60,
            list_timeout_secs: 30,
            stop_timeout_secs: 10,
        }
    }
}

impl VaultConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(models_dir) = std::env::var("MODEL_VAULT_MODELS_DIR") {
            config.models_dir = PathBuf::from(models_dir);
        }
        if let Ok(backup_dir) = std::env::var("MODEL_VAULT_BACKUP_DIR") {
            config.backup_dir = Some(PathBuf::from(backup_dir));
        }
        if let Ok(mode) = std::env::var("MODEL_VAULT_RUNTIME_MODE") {
            config.runtime.mode = mode.parse().context("Invalid MODEL_VAULT_RUNTIME_MODE value")?;
        }
        if let Ok(binary) = std::env::var("MODEL_VAULT_RUNTIME_BINARY") {
            config.runtime.binary = binary;
        }
        if let Ok(metrics_file) = std::env::var("MODEL_VAULT_METRICS_FILE") {
            config.metrics_file = Some(PathBuf::from(metrics_file));
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.models_dir.as_os_str().is_empty() {
            anyhow::bail!("models_dir cannot be empty");
        }
        if self.registry_host.trim().is_empty() || self.registry_host.contains('/') {
            anyhow::bail!("Invalid registry_host '{}'", self.registry_host);
        }
        if self.remote_origins.iter().any(|o| o.is_empty() || o.contains('/')) {
            anyhow::bail!("remote_origins entries must be non-empty host names");
        }

        if let Some(backup_dir) = &self.backup_dir {
            if backup_dir.as_os_str().is_empty() {
                anyhow::bail!("backup_dir cannot be empty");
            }
            if backup_dir.starts_with(&self.models_dir) {
                anyhow::bail!(
                    "backup_dir {:?} must not be inside models_dir {:?}",
                    backup_dir,
                    self.models_dir
                );
            }
        }

        let rt = &self.runtime;
        if rt.binary.trim().is_empty() {
            anyhow::bail!("runtime.binary cannot be empty");
        }
        if rt.mode == RuntimeMode::Container
            && (rt.container_engine.trim().is_empty() || rt.container_name.trim().is_empty())
        {
            anyhow::bail!("Container mode requires runtime.container_engine and runtime.container_name");
        }
        if rt.startup_timeout_secs == 0 || rt.list_timeout_secs == 0 || rt.stop_timeout_secs == 0 {
            anyhow::bail!("Runtime timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Store layout described by this configuration
    pub fn layout(&self) -> StoreLayout {
        StoreLayout::with_registry(
            self.models_dir.clone(),
            self.registry_host.clone(),
            self.remote_origins.clone(),
        )
    }
}

// Default functions

/// `$OLLAMA_MODELS`, else `~/.ollama/models`
fn default_models_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OLLAMA_MODELS") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".ollama/models"))
        .unwrap_or_else(|| PathBuf::from("/usr/share/ollama/.ollama/models"))
}
fn default_remote_origins() -> Vec<String> {
    DEFAULT_REMOTE_ORIGINS.iter().map(|o| o.to_string()).collect()
}
fn default_runtime_binary() -> String {
    "ollama".to_string()
}
