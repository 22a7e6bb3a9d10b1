//! Jobs running real programs through the standard pipeline

#![cfg(unix)]

use delve_controller::Controller;
use delve_core::{DelveConfig, Job, JobStatus, MemoryStore, StageName};
use delve_pipeline::{FnStage, Pipeline, Stage};
use delve_sandbox::SandboxRunner;
use delve_test_utils::{collect_events, progress_values, sample_spec, shell_sandbox, test_config};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(10);

fn standard_pipeline(program: &'static str, config: &DelveConfig) -> Pipeline {
    let analyze: Arc<dyn Stage> = Arc::new(FnStage::new(StageName::Analyze, |job: Job| async move {
        Ok(json!({ "problem": job.spec.problem_statement }))
    }));
    let generate: Arc<dyn Stage> = Arc::new(FnStage::new(StageName::Generate, move |_job: Job| async move {
        Ok(json!(program))
    }));
    let compose: Arc<dyn Stage> = Arc::new(FnStage::new(StageName::Compose, |job: Job| async move {
        let stdout = job
            .stage_output(StageName::Execute)
            .and_then(|record| record["stdout"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(json!(format!("answer: {stdout}")))
    }));
    let runner = Arc::new(SandboxRunner::new(config.sandbox.clone()));
    Pipeline::standard(analyze, generate, compose, runner, config).unwrap()
}

fn config_in(root: &Path, sandbox_timeout: f64) -> DelveConfig {
    let sandbox_root = root.join("sandbox");
    std::fs::create_dir_all(&sandbox_root).unwrap();
    test_config(2, 2)
        .with_sandbox(shell_sandbox(&sandbox_root, sandbox_timeout))
        .with_outputs_dir(root.join("outputs"))
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn program_output_reaches_the_report() {
    let scratch = tempfile::tempdir().unwrap();
    let config = config_in(scratch.path(), 10.0);
    let controller = Controller::new(
        &config,
        standard_pipeline("echo 55", &config),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let job = controller.create(sample_spec("sum")).await.unwrap();
    let mut events = controller.subscribe(job.id).await.unwrap();
    controller.start(job.id).await.unwrap();
    let events = collect_events(&mut events, LIMIT).await;

    assert_eq!(progress_values(&events), vec![10, 30, 60, 80, 90, 100]);
    let done = controller.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let record = done.stage_output(StageName::Execute).unwrap();
    assert_eq!(record["success"], true);
    assert_eq!(record["stdout"], "55\n");

    let outputs = scratch.path().join("outputs");
    assert_eq!(
        std::fs::read_to_string(outputs.join(format!("job_{}_report.md", job.id))).unwrap(),
        "answer: 55\n"
    );
    assert!(outputs.join(format!("job_{}_code.sh", job.id)).exists());
    assert!(is_empty_dir(&scratch.path().join("sandbox")));
}

#[tokio::test]
async fn sandbox_timeout_fails_the_job() {
    let scratch = tempfile::tempdir().unwrap();
    let config = config_in(scratch.path(), 0.5);
    let controller = Controller::new(
        &config,
        standard_pipeline("exec sleep 10", &config),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let id = controller.submit(sample_spec("sleepy")).await.unwrap();
    let failed = tokio::time::timeout(LIMIT, controller.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    let message = failed.error_message.clone().unwrap();
    assert!(message.starts_with("execute stage failed:"), "{message}");
    assert!(failed.stage_output(StageName::Generate).is_some());
    assert!(failed.stage_output(StageName::Execute).is_none());
    assert!(!scratch.path().join("outputs").exists());
}

#[tokio::test]
async fn job_budget_abandons_a_running_program() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = config_in(scratch.path(), 60.0);
    config.orchestrator.job_timeout_secs = Some(1);
    let controller = Controller::new(
        &config,
        standard_pipeline("exec sleep 30", &config),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let id = controller.submit(sample_spec("budget")).await.unwrap();
    let failed = tokio::time::timeout(LIMIT, controller.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("job exceeded its 1s time budget")
    );

    // Dropping the in-flight stage removes its workspace.
    tokio::time::timeout(LIMIT, async {
        while !is_empty_dir(&scratch.path().join("sandbox")) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("sandbox workspace was not cleaned up");
}
