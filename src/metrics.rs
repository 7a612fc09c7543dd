//! Prometheus metrics

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;

/// Install the Prometheus recorder
/// Returns a handle that renders the text exposition format
pub fn setup_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    tracing::debug!("Prometheus metrics recorder installed");

    Ok(handle)
}

/// Write the current metrics snapshot for a node-exporter textfile collector
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    let temp_file = path.with_extension("prom.tmp");
    std::fs::write(&temp_file, handle.render())
        .with_context(|| format!("Failed to write metrics file: {:?}", temp_file))?;
    std::fs::rename(&temp_file, path)
        .with_context(|| format!("Failed to move metrics file into place: {:?}", path))?;
    Ok(())
}

fn outcome(ok: bool) -> &'static str {
    if ok { "success" } else { "failure" }
}

/// Record a verification of a model or backup
pub fn record_verification(target: &'static str, complete: bool) {
    metrics::counter!("model_vault_verifications_total",
        "target" => target,
        "result" => if complete { "complete" } else { "incomplete" }
    )
    .increment(1);
}

/// Record a backup attempt
pub fn record_backup(ok: bool) {
    metrics::counter!("model_vault_backups_total",
        "outcome" => outcome(ok)
    )
    .increment(1);
}

/// Record a restore attempt
pub fn record_restore(mode: &'static str, ok: bool) {
    metrics::counter!("model_vault_restores_total",
        "mode" => mode,
        "outcome" => outcome(ok)
    )
    .increment(1);
}

/// Record the final outcome of an install
pub fn record_install(outcome: &'static str) {
    metrics::counter!("model_vault_installs_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a runtime listing call
pub fn record_runtime_list() {
    metrics::counter!("model_vault_runtime_list_calls_total").increment(1);
}
