//! Runtime driven through its command-line client
//!
//! In `local` mode commands run on the host; in `container` mode they run via
//! `<engine> exec <container>`. Either way, a runtime that is not answering
//! is started on demand and torn down again by the cleanup registry.

use super::{ModelRuntime, parse_list_output};
use crate::cleanup::CleanupTask;
use crate::config::{RuntimeConfig, RuntimeMode};
use crate::error::{VaultError, VaultResult};
use crate::metrics;
use crate::store::ModelSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Interval between readiness checks while starting the runtime
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Something this process started and must stop again
enum StartedRuntime {
    Process(Child),
    Container(String),
}

#[derive(Default)]
struct RuntimeState {
    ready: bool,
    started: Option<StartedRuntime>,
}

/// Production runtime using `tokio::process`
pub struct CommandRuntime {
    config: RuntimeConfig,
    models_dir: PathBuf,
    state: Mutex<RuntimeState>,
}

impl CommandRuntime {
    pub fn new(config: RuntimeConfig, models_dir: PathBuf) -> Self {
        Self {
            config,
            models_dir,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Build a client command for the configured mode
    fn client_command(&self, args: &[&str]) -> Command {
        let mut cmd = match self.config.mode {
            RuntimeMode::Local => Command::new(&self.config.binary),
            RuntimeMode::Container => {
                let mut cmd = Command::new(&self.config.container_engine);
                cmd.arg("exec")
                    .arg(&self.config.container_name)
                    .arg(&self.config.binary);
                cmd
            }
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a command and capture stdout; non-zero exit is an error
    async fn run(&self, mut cmd: Command, timeout: Option<Duration>) -> VaultResult<String> {
        let description = format!("{:?}", cmd.as_std());
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    VaultError::Runtime(format!("{} timed out after {:?}", description, limit))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| VaultError::Runtime(format!("Failed to run {}: {}", description, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VaultError::Runtime(format!(
                "{} exited with {}: {}",
                description,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn client(&self, args: &[&str], timeout: Option<Duration>) -> VaultResult<String> {
        self.ensure_running().await?;
        self.run(self.client_command(args), timeout).await
    }

    fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.config.list_timeout_secs)
    }

    async fn is_ready(&self) -> bool {
        self.run(self.client_command(&["list"]), Some(self.list_timeout()))
            .await
            .is_ok()
    }

    /// Use an already-running runtime, or start one and wait until it answers
    pub async fn ensure_running(&self) -> VaultResult<()> {
        let mut state = self.state.lock().await;
        if state.ready {
            return Ok(());
        }

        if self.is_ready().await {
            tracing::debug!(mode = ?self.config.mode, "Runtime already running");
            state.ready = true;
            return Ok(());
        }

        tracing::info!(mode = ?self.config.mode, "Runtime not responding, starting it");
        state.started = Some(match self.config.mode {
            RuntimeMode::Local => self.start_local()?,
            RuntimeMode::Container => self.start_container().await?,
        });

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.startup_timeout_secs);
        while tokio::time::Instant::now() < deadline {
            if self.is_ready().await {
                tracing::info!(mode = ?self.config.mode, "Runtime ready");
                state.ready = true;
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Err(VaultError::Runtime(format!(
            "Runtime did not become ready within {}s",
            self.config.startup_timeout_secs
        )))
    }

    fn start_local(&self) -> VaultResult<StartedRuntime> {
        let child = Command::new(&self.config.binary)
            .arg("serve")
            .env("OLLAMA_MODELS", &self.models_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VaultError::Runtime(format!("Failed to spawn {} serve: {}", self.config.binary, e))
            })?;

        tracing::info!(
            binary = %self.config.binary,
            pid = ?child.id(),
            models_dir = ?self.models_dir,
            "Runtime process spawned"
        );
        Ok(StartedRuntime::Process(child))
    }

    async fn start_container(&self) -> VaultResult<StartedRuntime> {
        let rt = &self.config;
        let mut cmd = Command::new(&rt.container_engine);
        cmd.arg("run")
            .arg("-d")
            .arg("--rm")
            .arg("--name")
            .arg(&rt.container_name)
            .arg("-v")
            .arg(format!(
                "{}:{}",
                self.models_dir.display(),
                rt.container_models_dir
            ))
            .arg("-e")
            .arg(format!("OLLAMA_MODELS={}", rt.container_models_dir))
            .arg(&rt.image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let container_id = self.run(cmd, None).await?;
        tracing::info!(
            container = %rt.container_name,
            id = %container_id.trim(),
            image = %rt.image,
            "Runtime container started"
        );
        Ok(StartedRuntime::Container(rt.container_name.clone()))
    }

    async fn stop_started(&self, started: StartedRuntime) {
        let timeout = Duration::from_secs(self.config.stop_timeout_secs);
        match started {
            StartedRuntime::Process(mut child) => {
                if let Some(pid) = child.id() {
                    #[cfg(unix)]
                    {
                        use nix::sys::signal::{Signal, kill};
                        use nix::unistd::Pid;

                        let pid = Pid::from_raw(pid as i32);
                        let _ = kill(pid, Signal::SIGTERM);

                        tokio::select! {
                            _ = child.wait() => {
                                tracing::info!("Runtime process stopped gracefully");
                            }
                            _ = tokio::time::sleep(timeout) => {
                                tracing::warn!("Runtime shutdown timeout, sending SIGKILL");
                                let _ = kill(pid, Signal::SIGKILL);
                                let _ = child.wait().await;
                            }
                        }
                    }

                    #[cfg(not(unix))]
                    {
                        let _ = pid;
                        let _ = child.kill().await;
                    }
                }
            }
            StartedRuntime::Container(name) => {
                let mut cmd = Command::new(&self.config.container_engine);
                cmd.arg("rm")
                    .arg("-f")
                    .arg(&name)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                match self.run(cmd, Some(timeout)).await {
                    Ok(_) => tracing::info!(container = %name, "Runtime container removed"),
                    Err(e) => {
                        tracing::warn!(container = %name, error = %e, "Failed to remove runtime container")
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ModelRuntime for CommandRuntime {
    async fn list(&self) -> VaultResult<Vec<String>> {
        metrics::record_runtime_list();
        let stdout = self.client(&["list"], Some(self.list_timeout())).await?;
        Ok(parse_list_output(&stdout))
    }

    async fn pull(&self, spec: &ModelSpec) -> VaultResult<()> {
        let key = spec.key();
        tracing::info!(model = %key, "Pulling model via runtime");
        self.client(&["pull", &key], None).await.map(|_| ())
    }

    async fn remove(&self, spec: &ModelSpec) -> VaultResult<()> {
        let key = spec.key();
        tracing::info!(model = %key, "Removing model via runtime");
        self.client(&["rm", &key], Some(self.list_timeout()))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CleanupTask for CommandRuntime {
    fn name(&self) -> &str {
        "model runtime"
    }

    async fn cleanup(&self) {
        let started = {
            let mut state = self.state.lock().await;
            state.ready = false;
            state.started.take()
        };
        if let Some(started) = started {
            self.stop_started(started).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(binary: &str) -> CommandRuntime {
        let config = RuntimeConfig {
            binary: binary.to_string(),
            startup_timeout_secs: 1,
            list_timeout_secs: 1,
            ..Default::default()
        };
        CommandRuntime::new(config, PathBuf::from("/tmp/models"))
    }

    #[test]
    fn test_client_command_local() {
        let rt = runtime("ollama");
        let cmd = rt.client_command(&["list"]);
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "ollama");
        assert_eq!(std.get_args().collect::<Vec<_>>(), vec!["list"]);
    }

    #[test]
    fn test_client_command_container() {
        let config = RuntimeConfig {
            mode: RuntimeMode::Container,
            container_name: "rt".to_string(),
            ..Default::default()
        };
        let rt = CommandRuntime::new(config, PathBuf::from("/tmp/models"));
        let cmd = rt.client_command(&["pull", "demo:1b"]);
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "docker");
        assert_eq!(
            std.get_args().collect::<Vec<_>>(),
            vec!["exec", "rt", "ollama", "pull", "demo:1b"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let rt = runtime("/nonexistent/runtime-binary-12345");
        let err = rt.list().await.unwrap_err();
        assert!(matches!(err, VaultError::Runtime(_)));
        // nothing was started, so cleanup is a no-op
        rt.cleanup().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_runtime_error() {
        let rt = runtime("false");
        let err = rt.run(rt.client_command(&[]), None).await.unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout() {
        let rt = runtime("echo");
        let out = rt
            .run(rt.client_command(&["NAME", "ID"]), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(out.trim(), "NAME ID");
    }
}
