//! Execute stage
//!
//! Runs the program produced by the generate stage through a [`CodeRunner`]
//! and records the execution record as its output.

use crate::stage::Stage;
use async_trait::async_trait;
use delve_core::{Job, SandboxError, StageError, StageName};
use delve_sandbox::CodeRunner;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Job config key overriding the execution budget
pub const TIMEOUT_OVERRIDE_KEY: &str = "execution_timeout_secs";

/// Built-in execute stage
pub struct ExecuteStage {
    runner: Arc<dyn CodeRunner>,
    timeout_secs: f64,
    fail_on_nonzero_exit: bool,
}

impl ExecuteStage {
    /// Create stage with a default budget
    #[must_use]
    pub fn new(runner: Arc<dyn CodeRunner>, timeout_secs: f64) -> Self {
        Self {
            runner,
            timeout_secs,
            fail_on_nonzero_exit: false,
        }
    }

    /// Treat a nonzero exit status as a stage failure
    #[inline]
    #[must_use]
    pub fn fail_on_nonzero_exit(mut self, enabled: bool) -> Self {
        self.fail_on_nonzero_exit = enabled;
        self
    }

    fn budget_for(&self, job: &Job) -> f64 {
        job.spec
            .config
            .as_ref()
            .and_then(|config| config.get(TIMEOUT_OVERRIDE_KEY))
            .and_then(Value::as_f64)
            .unwrap_or(self.timeout_secs)
    }
}

impl std::fmt::Debug for ExecuteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteStage")
            .field("timeout_secs", &self.timeout_secs)
            .field("fail_on_nonzero_exit", &self.fail_on_nonzero_exit)
            .finish_non_exhaustive()
    }
}

/// Program text from the generate stage output
///
/// Accepts a bare string or an object with a string `code` field.
///
/// # Errors
/// `StageError` for the execute stage when there is no usable program.
pub fn program_from(job: &Job) -> Result<&str, StageError> {
    let generated = job
        .stage_output(StageName::Generate)
        .ok_or_else(|| StageError::new(StageName::Execute, "no generated program to run"))?;
    let program = match generated {
        Value::String(code) => Some(code.as_str()),
        Value::Object(fields) => fields.get("code").and_then(Value::as_str),
        _ => None,
    };
    match program {
        Some(code) if !code.trim().is_empty() => Ok(code),
        Some(_) => Err(StageError::new(StageName::Execute, "generated program is empty")),
        None => Err(StageError::new(
            StageName::Execute,
            "generate output has no program text",
        )),
    }
}

#[async_trait]
impl Stage for ExecuteStage {
    fn name(&self) -> StageName {
        StageName::Execute
    }

    async fn run(&self, job: &Job) -> Result<Value, StageError> {
        let program = program_from(job)?;
        let budget = self.budget_for(job);

        let outcome = self
            .runner
            .run(program, budget)
            .await
            .and_then(|outcome| outcome.into_result())
            .map_err(|e| match e {
                SandboxError::Timeout { secs } => StageError::new(
                    StageName::Execute,
                    format!("program exceeded its {secs}s budget"),
                ),
                other => StageError::new(StageName::Execute, other.to_string()),
            })?;

        info!(
            job_id = %job.id,
            exit_code = ?outcome.exit_code,
            duration_secs = outcome.duration_secs,
            "program finished"
        );
        if !outcome.success {
            warn!(job_id = %job.id, exit_code = ?outcome.exit_code, "program exited unsuccessfully");
            if self.fail_on_nonzero_exit {
                let code = outcome
                    .exit_code
                    .map_or_else(|| "a signal".to_string(), |code| format!("status {code}"));
                return Err(StageError::new(
                    StageName::Execute,
                    format!("program exited with {code}: {}", outcome.stderr.trim()),
                ));
            }
        }

        serde_json::to_value(&outcome)
            .map_err(|e| StageError::new(StageName::Execute, format!("unrecordable outcome: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::JobSpec;
    use delve_sandbox::SandboxOutcome;
    use mockall::mock;
    use serde_json::json;

    mock! {
        Runner {}

        #[async_trait]
        impl CodeRunner for Runner {
            async fn run(&self, program: &str, timeout_secs: f64) -> Result<SandboxOutcome, SandboxError>;
        }
    }

    fn job_with_program(generated: Value) -> Job {
        let mut job = Job::new(JobSpec::new("t", "d"));
        job.record_stage_output(StageName::Generate, generated);
        job
    }

    fn ok_outcome(stdout: &str) -> SandboxOutcome {
        SandboxOutcome::exited(Some(0), stdout.into(), String::new(), 0.05)
    }

    #[tokio::test]
    async fn runs_generated_code_and_records_outcome() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|program, timeout| program == "print(42)" && *timeout == 30.0)
            .times(1)
            .returning(|_, _| Ok(ok_outcome("42\n")));
        let stage = ExecuteStage::new(Arc::new(runner), 30.0);

        let output = stage
            .run(&job_with_program(json!({"code": "print(42)", "language": "python"})))
            .await
            .unwrap();

        assert_eq!(output["success"], true);
        assert_eq!(output["stdout"], "42\n");
    }

    #[tokio::test]
    async fn job_config_overrides_budget() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|program, timeout| program == "print(1)" && *timeout == 5.0)
            .times(1)
            .returning(|_, _| Ok(ok_outcome("")));
        let stage = ExecuteStage::new(Arc::new(runner), 300.0);

        let mut job = job_with_program(json!("print(1)"));
        job.spec.config = Some(json!({ TIMEOUT_OVERRIDE_KEY: 5.0 }));
        stage.run(&job).await.unwrap();
    }

    #[tokio::test]
    async fn timeout_fails_the_stage() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .returning(|_, timeout| Ok(SandboxOutcome::timed_out(timeout, String::new(), String::new())));
        let stage = ExecuteStage::new(Arc::new(runner), 2.0);

        let err = stage.run(&job_with_program(json!("loop()"))).await.unwrap_err();
        assert_eq!(err.stage, StageName::Execute);
        assert!(err.message.contains("budget"), "{}", err.message);
    }

    #[tokio::test]
    async fn launch_failure_fails_the_stage() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(SandboxOutcome::launch_failed("no python3", 0.0)));
        let stage = ExecuteStage::new(Arc::new(runner), 2.0);

        let err = stage.run(&job_with_program(json!("x"))).await.unwrap_err();
        assert!(err.message.contains("no python3"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_recorded_unless_strict() {
        let failing = || SandboxOutcome::exited(Some(1), String::new(), "Traceback".into(), 0.1);

        let mut lenient_runner = MockRunner::new();
        lenient_runner.expect_run().returning(move |_, _| Ok(failing()));
        let lenient = ExecuteStage::new(Arc::new(lenient_runner), 2.0);
        let output = lenient.run(&job_with_program(json!("x"))).await.unwrap();
        assert_eq!(output["exit_code"], 1);

        let mut strict_runner = MockRunner::new();
        strict_runner.expect_run().returning(move |_, _| Ok(failing()));
        let strict = ExecuteStage::new(Arc::new(strict_runner), 2.0).fail_on_nonzero_exit(true);
        let err = strict.run(&job_with_program(json!("x"))).await.unwrap_err();
        assert_eq!(err.message, "program exited with status 1: Traceback");
    }

    #[tokio::test]
    async fn missing_program_never_reaches_runner() {
        let mut runner = MockRunner::new();
        runner.expect_run().never();
        let stage = ExecuteStage::new(Arc::new(runner), 2.0);

        let err = stage.run(&Job::new(JobSpec::new("t", "d"))).await.unwrap_err();
        assert_eq!(err.message, "no generated program to run");

        let err = stage.run(&job_with_program(json!({"lang": "py"}))).await.unwrap_err();
        assert_eq!(err.message, "generate output has no program text");
    }
}
