//! Model runtime collaborator
//!
//! The runtime owns downloads and its own model listing. This crate only
//! drives it through three synchronous-looking commands.

use crate::error::VaultResult;
use crate::store::ModelSpec;
use async_trait::async_trait;

pub mod command;

pub use command::CommandRuntime;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Operations the lifecycle needs from the model runtime
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Keys (`name:tag`) of every model the runtime reports as installed
    async fn list(&self) -> VaultResult<Vec<String>>;

    /// Download a model into the store
    async fn pull(&self, spec: &ModelSpec) -> VaultResult<()>;

    /// Delete a model's manifest from the store (blobs are left to the runtime)
    async fn remove(&self, spec: &ModelSpec) -> VaultResult<()>;
}

/// Parse `list` output into normalised model keys
///
/// ```text
/// NAME              ID              SIZE      MODIFIED
/// llama2:latest     78e26419b446    3.8 GB    2 days ago
/// ```
pub fn parse_list_output(stdout: &str) -> Vec<String> {
    let mut keys: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("NAME"))
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|name| match ModelSpec::parse(name) {
            Ok(spec) => Some(spec.key()),
            Err(e) => {
                tracing::debug!(entry = %name, error = %e, "Skipping unparsable list entry");
                None
            }
        })
        .collect();
    keys.sort();
    keys.dedup();
    keys
}
