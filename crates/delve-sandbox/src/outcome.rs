//! Result of one sandboxed run

use delve_core::SandboxError;
use serde::{Deserialize, Serialize};

/// What happened when a program ran
///
/// A program that ran and exited nonzero is a successful *run* with
/// `success == false`; only budget expiry and launch failures carry `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    /// Exited with status 0 within budget
    pub success: bool,
    /// Exit status, absent when killed or never started
    pub exit_code: Option<i32>,
    /// Captured standard output, lossily decoded
    pub stdout: String,
    /// Captured standard error, lossily decoded
    pub stderr: String,
    /// Wall-clock seconds from launch to reap
    pub duration_secs: f64,
    /// Killed because the budget elapsed
    pub timed_out: bool,
    /// Timeout or launch failure description
    pub error: Option<String>,
}

impl SandboxOutcome {
    /// Program ran to completion
    #[must_use]
    pub fn exited(exit_code: Option<i32>, stdout: String, stderr: String, duration_secs: f64) -> Self {
        Self {
            success: exit_code == Some(0),
            exit_code,
            stdout,
            stderr,
            duration_secs,
            timed_out: false,
            error: None,
        }
    }

    /// Program was killed at the budget
    #[must_use]
    pub fn timed_out(timeout_secs: f64, stdout: String, stderr: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout,
            stderr,
            duration_secs: timeout_secs,
            timed_out: true,
            error: Some(format!("execution timed out after {timeout_secs} seconds")),
        }
    }

    /// Program never started, or could not be reaped
    #[must_use]
    pub fn launch_failed(message: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_secs,
            timed_out: false,
            error: Some(message.into()),
        }
    }

    /// Whether the program never ran
    #[inline]
    #[must_use]
    pub fn is_launch_failure(&self) -> bool {
        !self.timed_out && self.exit_code.is_none() && self.error.is_some()
    }

    /// Turn timeouts and launch failures into errors; keep everything else
    ///
    /// # Errors
    /// `SandboxError::Timeout` or `SandboxError::Launch`.
    pub fn into_result(self) -> Result<Self, SandboxError> {
        if self.timed_out {
            return Err(SandboxError::Timeout {
                secs: self.duration_secs,
            });
        }
        if self.is_launch_failure() {
            return Err(SandboxError::Launch(self.error.unwrap_or_default()));
        }
        Ok(self)
    }
}
