//! Subprocess runner
//!
//! Each run gets a fresh scratch directory holding only the program file.
//! The child runs with the scratch directory as its working directory, its
//! output pipes are drained concurrently so a chatty program cannot stall on
//! a full pipe, and the whole run is raced against the budget. The scratch
//! directory is removed when the run returns, whatever the outcome.

use crate::outcome::SandboxOutcome;
use async_trait::async_trait;
use delve_core::{SandboxConfig, SandboxError};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs a program text under a wall-clock budget
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Run `program`, killing it after `timeout_secs`
    ///
    /// # Errors
    /// `SandboxError::InvalidTimeout` for a non-positive or non-finite budget
    /// and `SandboxError::Workspace` when the scratch directory cannot be
    /// prepared. Timeouts and launch failures are reported in the outcome.
    async fn run(&self, program: &str, timeout_secs: f64) -> Result<SandboxOutcome, SandboxError>;
}

/// Runner that materializes the program into a temp dir and starts an interpreter on it
#[derive(Debug, Clone, Default)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Create runner
    #[inline]
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Active settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn prepare_workspace(&self, program: &str) -> Result<TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("delve-sandbox-");
        let workspace = match &self.config.work_root {
            Some(root) => builder
                .tempdir_in(root)
                .map_err(|e| SandboxError::workspace(root, e))?,
            None => builder
                .tempdir()
                .map_err(|e| SandboxError::workspace(std::env::temp_dir(), e))?,
        };

        let program_path = workspace.path().join(&self.config.program_file);
        tokio::fs::write(&program_path, program)
            .await
            .map_err(|e| SandboxError::workspace(&program_path, e))?;
        Ok(workspace)
    }

    fn command(&self, workspace: &TempDir) -> Command {
        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&self.config.interpreter_args)
            .arg(&self.config.program_file)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.config.clear_env {
            command.env_clear();
        }
        command.envs(&self.config.env);
        command
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.kill_grace_ms)
    }
}

#[async_trait]
impl CodeRunner for SandboxRunner {
    async fn run(&self, program: &str, timeout_secs: f64) -> Result<SandboxOutcome, SandboxError> {
        let budget = validate_timeout(timeout_secs)?;
        let workspace = self.prepare_workspace(program).await?;
        debug!(
            workspace = %workspace.path().display(),
            interpreter = %self.config.interpreter,
            timeout_secs,
            "launching sandboxed program"
        );

        let started = Instant::now();
        let mut child = match self.command(&workspace).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(interpreter = %self.config.interpreter, error = %e, "sandbox launch failed");
                return Ok(SandboxOutcome::launch_failed(
                    format!("failed to launch '{}': {e}", self.config.interpreter),
                    started.elapsed().as_secs_f64(),
                ));
            }
        };

        let stdout = OutputCapture::spawn(child.stdout.take());
        let stderr = OutputCapture::spawn(child.stderr.take());

        let outcome = match tokio::time::timeout(budget, child.wait()).await {
            Ok(Ok(status)) => {
                let duration = started.elapsed().as_secs_f64();
                let stdout = stdout.finish(self.grace()).await;
                let stderr = stderr.finish(self.grace()).await;
                info!(exit_code = ?status.code(), duration_secs = duration, "sandboxed program exited");
                SandboxOutcome::exited(status.code(), stdout, stderr, duration)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait for sandboxed program");
                stdout.abort();
                stderr.abort();
                SandboxOutcome::launch_failed(
                    format!("failed to wait for program: {e}"),
                    started.elapsed().as_secs_f64(),
                )
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to signal timed-out program");
                }
                if let Err(e) = child.wait().await {
                    warn!(error = %e, "failed to reap timed-out program");
                }
                let stdout = stdout.finish(self.grace()).await;
                let stderr = stderr.finish(self.grace()).await;
                warn!(timeout_secs, "sandboxed program exceeded its budget and was killed");
                SandboxOutcome::timed_out(timeout_secs, stdout, stderr)
            }
        };

        drop(workspace);
        Ok(outcome)
    }
}

/// Reject budgets that are not a positive, finite number of seconds
///
/// # Errors
/// `SandboxError::InvalidTimeout`.
pub fn validate_timeout(timeout_secs: f64) -> Result<Duration, SandboxError> {
    if !(timeout_secs.is_finite() && timeout_secs > 0.0) {
        return Err(SandboxError::InvalidTimeout(timeout_secs));
    }
    Ok(Duration::try_from_secs_f64(timeout_secs).unwrap_or(Duration::MAX))
}

/// Background reader for one output pipe
///
/// Bytes land in a shared buffer as they arrive, so output produced before a
/// kill is kept even if the reader has to be abandoned.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    /// Wait up to `grace` for end of stream, then decode what arrived
    ///
    /// A grandchild that inherited the pipe can hold it open past the child's
    /// exit; the bound keeps that from stalling the run.
    async fn finish(mut self, grace: Duration) -> String {
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(grace, &mut reader).await.is_err() {
                debug!("output pipe still open after grace period; abandoning reader");
                reader.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn abort(self) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_budgets() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                validate_timeout(bad),
                Err(SandboxError::InvalidTimeout(_))
            ));
        }
    }

    #[test]
    fn accepts_fractional_and_huge_budgets() {
        assert_eq!(validate_timeout(0.25).unwrap(), Duration::from_millis(250));
        assert_eq!(validate_timeout(1e300).unwrap(), Duration::MAX);
    }

    #[tokio::test]
    async fn invalid_budget_fails_before_launch() {
        let runner = SandboxRunner::new(SandboxConfig::shell().with_interpreter("no-such-binary"));
        let err = runner.run("echo hi", 0.0).await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidTimeout(t) if t == 0.0));
    }
}
