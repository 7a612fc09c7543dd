//! Model Vault - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_vault::{
    CleanupRegistry, CommandRuntime, EnsureOptions, ErrorKind, ModelLifecycle, ModelOutcome,
    ModelSpec, RestorePlan, VaultConfig, VaultError, VerifyOptions, VerifyTarget, metrics,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;

const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELLED: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "model-vault")]
#[command(about = "Verify, back up and restore local model stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the model store directory
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a model's manifest and blobs are present
    Verify {
        spec: String,
        /// Only require the manifest
        #[arg(long)]
        manifest_only: bool,
        /// Re-read the manifest instead of using cached blob lists
        #[arg(long)]
        no_cache: bool,
    },
    /// Check a backup directory's structure and checksum
    VerifyBackup { dir: PathBuf },
    /// Back up one model
    Backup {
        spec: String,
        /// Backup root (defaults to backup_dir from config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Back up every model in the store
    BackupAll {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Restore a backup directory into the store
    Restore {
        path: PathBuf,
        /// Overwrite existing files and accept checksum mismatches
        #[arg(long)]
        force: bool,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Make models present, restoring from backup or downloading as needed
    Install {
        #[arg(required = true)]
        specs: Vec<String>,
        /// Never restore from backup
        #[arg(long)]
        no_restore: bool,
        /// Ignore the runtime's model listing and check the store directly
        #[arg(long)]
        bypass_cache: bool,
    },
    /// Remove a model through the runtime; blobs are left in place
    Remove { spec: String },
    /// List models in the store with their completeness
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = VaultConfig::load(cli.config.clone())?;

    // CLI overrides
    if let Some(models_dir) = cli.models_dir.clone() {
        config.models_dir = models_dir;
    }

    config.validate()?;

    tracing::debug!(
        models_dir = ?config.models_dir,
        backup_dir = ?config.backup_dir,
        runtime_mode = ?config.runtime.mode,
        "Configuration loaded"
    );

    let prometheus_handle = match config.metrics_file {
        Some(_) => Some(metrics::setup_metrics()?),
        None => None,
    };

    let runtime = Arc::new(CommandRuntime::new(
        config.runtime.clone(),
        config.models_dir.clone(),
    ));
    let cleanup = CleanupRegistry::new();
    cleanup.register(runtime.clone()).await;

    let lifecycle = ModelLifecycle::new(config.layout(), runtime, config.backup_dir.clone());

    let code = tokio::select! {
        code = execute(cli.command, &lifecycle, &config, cli.json) => code,
        _ = shutdown_signal() => {
            tracing::warn!("Interrupted, running cleanup");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    };

    cleanup.run_all().await;

    if let (Some(handle), Some(path)) = (&prometheus_handle, &config.metrics_file) {
        if let Err(e) = metrics::write_textfile(handle, path) {
            tracing::warn!(path = ?path, error = %e, "Failed to write metrics file");
        }
    }

    code
}

async fn execute(
    command: Command,
    lifecycle: &ModelLifecycle,
    config: &VaultConfig,
    json: bool,
) -> Result<ExitCode> {
    match command {
        Command::Verify {
            spec,
            manifest_only,
            no_cache,
        } => {
            let spec = ModelSpec::parse(&spec)?;
            let opts = VerifyOptions {
                use_cache: !no_cache,
                check_blobs: !manifest_only,
            };
            let result = lifecycle
                .checker()
                .verify(&VerifyTarget::Model(spec.clone()), opts);
            if json {
                print_json(&result)?;
            } else {
                let status = if result.complete { "complete" } else { "incomplete" };
                println!("{}: {}", spec, status);
                for problem in &result.problems {
                    println!("  {}", problem);
                }
            }
            Ok(exit_status(result.complete))
        }

        Command::VerifyBackup { dir } => {
            let result = lifecycle
                .checker()
                .verify(&VerifyTarget::Backup(dir.clone()), VerifyOptions::default());
            if json {
                print_json(&result)?;
            } else {
                let status = match (result.complete, result.is_degraded()) {
                    (true, false) => "verified",
                    (true, true) => "complete (no checksum file, integrity unverified)",
                    (false, _) => "failed",
                };
                println!("{}: {}", dir.display(), status);
                for problem in &result.problems {
                    println!("  {}", problem);
                }
            }
            Ok(exit_status(result.complete))
        }

        Command::Backup { spec, dir } => {
            let spec = ModelSpec::parse(&spec)?;
            match lifecycle.backup(&spec, dir.as_deref()) {
                Ok(record) => {
                    if json {
                        print_json(&record)?;
                    } else {
                        println!("{}: {:?} -> {}", spec, record.status, record.directory.display());
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_error(&e)),
            }
        }

        Command::BackupAll { dir } => {
            let results = match lifecycle.backup_all(dir.as_deref()) {
                Ok(results) => results,
                Err(e) => return Ok(report_error(&e)),
            };
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            if json {
                let summary: Vec<_> = results
                    .iter()
                    .map(|(spec, r)| match r {
                        Ok(record) => serde_json::json!({ "model": spec, "backup": record }),
                        Err(e) => serde_json::json!({ "model": spec, "error": e.to_string() }),
                    })
                    .collect();
                print_json(&summary)?;
            } else {
                for (spec, result) in &results {
                    match result {
                        Ok(record) => println!("{}: {:?}", spec, record.status),
                        Err(e) => println!("{}: failed: {}", spec, e),
                    }
                }
                println!("{} model(s), {} failed", results.len(), failed);
            }
            Ok(exit_status(failed == 0))
        }

        Command::Restore { path, force, yes } => {
            let plan = match lifecycle.plan_restore(&path, force) {
                Ok(plan) => plan,
                Err(e) => return Ok(report_error(&e)),
            };
            for warning in &plan.warnings {
                eprintln!("warning: {}", warning);
            }

            if force && !yes && std::io::stdin().is_terminal() && !confirm_restore(&plan).await? {
                return Ok(report_error(&VaultError::Cancelled));
            }

            match lifecycle.apply_restore(&plan).await {
                Ok(report) => {
                    if json {
                        print_json(&report)?;
                    } else {
                        let models: Vec<String> = report.specs.iter().map(|s| s.key()).collect();
                        println!(
                            "Restored {} file(s) ({} overwritten) for {}",
                            report.files_restored,
                            report.files_overwritten,
                            if models.is_empty() { "unknown model".to_string() } else { models.join(", ") }
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_error(&e)),
            }
        }

        Command::Install {
            specs,
            no_restore,
            bypass_cache,
        } => {
            let specs = specs
                .iter()
                .map(|s| ModelSpec::parse(s))
                .collect::<Result<Vec<_>, _>>()?;
            let opts = EnsureOptions {
                auto_restore: config.auto_restore && !no_restore,
                bypass_cache,
            };
            let report = lifecycle.ensure_models(&specs, opts).await;
            if json {
                print_json(&report)?;
            } else {
                for model in &report.models {
                    match &model.outcome {
                        ModelOutcome::Failed { stage, error } => {
                            println!("{}: failed at {:?}: {}", model.spec, stage, error)
                        }
                        outcome => println!("{}: {:?}", model.spec, outcome),
                    }
                }
            }
            Ok(exit_status(report.all_succeeded()))
        }

        Command::Remove { spec } => {
            let spec = ModelSpec::parse(&spec)?;
            match lifecycle.remove_model(&spec).await {
                Ok(()) => {
                    println!("{}: removed", spec);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_error(&e)),
            }
        }

        Command::List => {
            let specs = lifecycle
                .layout()
                .installed_specs()
                .context("Failed to scan model store")?;
            let rows: Vec<_> = specs
                .iter()
                .map(|spec| {
                    let result = lifecycle.checker().verify_model(spec, VerifyOptions::default());
                    (spec, result.complete)
                })
                .collect();
            if json {
                let rows: Vec<_> = rows
                    .iter()
                    .map(|(spec, complete)| serde_json::json!({ "model": spec, "complete": complete }))
                    .collect();
                print_json(&rows)?;
            } else {
                for (spec, complete) in &rows {
                    println!("{:<48} {}", spec.key(), if *complete { "complete" } else { "incomplete" });
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}

/// Print an operator-facing error with its remediation hint
fn report_error(e: &VaultError) -> ExitCode {
    tracing::error!(error = %e, kind = ?e.kind(), "Operation failed");
    eprintln!("error: {}", e);
    if let VaultError::Conflict { paths } = e {
        for path in paths.iter().take(10) {
            eprintln!("  exists: {}", path.display());
        }
        if paths.len() > 10 {
            eprintln!("  ... and {} more", paths.len() - 10);
        }
    }
    if let Some(hint) = e.remediation() {
        eprintln!("hint: {}", hint);
    }
    ExitCode::from(exit_code_for(e.kind()))
}

fn exit_code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn confirm_restore(plan: &RestorePlan) -> Result<bool> {
    eprintln!(
        "About to restore {} file(s) from {}; files already in the store will be overwritten.",
        plan.files.len(),
        plan.backup_dir.display()
    );
    eprint!("Continue? [y/N] ");

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("Confirmation prompt failed")?
    .context("Failed to read confirmation")?;

    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_restore_flags() {
        let cli = Cli::try_parse_from(["model-vault", "restore", "/b/demo_1b/demo_1b", "--force", "--yes"])
            .unwrap();
        match cli.command {
            Command::Restore { path, force, yes } => {
                assert_eq!(path, PathBuf::from("/b/demo_1b/demo_1b"));
                assert!(force);
                assert!(yes);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_install_requires_a_spec() {
        assert!(Cli::try_parse_from(["model-vault", "install"]).is_err());
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_cancelled_exit_code() {
        assert_eq!(exit_code_for(VaultError::Cancelled.kind()), EXIT_CANCELLED);
        assert_eq!(
            exit_code_for(VaultError::Runtime("x".to_string()).kind()),
            EXIT_FAILURE
        );
    }
}
