//! Testing utilities for the Delve workspace
//!
//! Scripted stages, configs and event helpers shared by integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use delve_core::{
    DelveConfig, Job, JobEvent, JobSpec, OrchestratorConfig, SandboxConfig, StageError, StageName,
};
use delve_notify::Subscription;
use delve_pipeline::{Pipeline, Stage};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Stage that always succeeds with a fixed output and counts its runs
#[derive(Debug)]
pub struct StaticStage {
    name: StageName,
    output: Value,
    runs: AtomicUsize,
}

impl StaticStage {
    pub fn new(name: StageName) -> Self {
        Self::with_output(name, json!({ "stage": name.as_str() }))
    }

    pub fn with_output(name: StageName, output: Value) -> Self {
        Self {
            name,
            output,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for StaticStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, _job: &Job) -> Result<Value, StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Stage that always fails
#[derive(Debug)]
pub struct FailingStage {
    name: StageName,
    message: String,
}

impl FailingStage {
    pub fn new(name: StageName, message: &str) -> Self {
        Self {
            name,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, _job: &Job) -> Result<Value, StageError> {
        Err(StageError::new(self.name, self.message.clone()))
    }
}

/// Stage that parks until the test releases it
#[derive(Debug)]
pub struct GatedStage {
    name: StageName,
    entered: Notify,
    release: Notify,
    runs: AtomicUsize,
}

impl GatedStage {
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            entered: Notify::new(),
            release: Notify::new(),
            runs: AtomicUsize::new(0),
        }
    }

    /// Resolves once the stage has started running
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked stage finish
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for GatedStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, _job: &Job) -> Result<Value, StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(json!({ "stage": self.name.as_str(), "gated": true }))
    }
}

/// Stage that sleeps before succeeding
#[derive(Debug)]
pub struct SlowStage {
    name: StageName,
    delay: Duration,
}

impl SlowStage {
    pub fn new(name: StageName, delay: Duration) -> Self {
        Self { name, delay }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, _job: &Job) -> Result<Value, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "stage": self.name.as_str() }))
    }
}

/// Pipeline of `StaticStage`s for the given slots
pub fn static_pipeline(names: &[StageName]) -> Pipeline {
    let stages: Vec<Arc<dyn Stage>> = names
        .iter()
        .map(|name| Arc::new(StaticStage::new(*name)) as Arc<dyn Stage>)
        .collect();
    Pipeline::new(stages).unwrap()
}

/// Pipeline of `StaticStage`s covering every slot
pub fn full_static_pipeline() -> Pipeline {
    static_pipeline(&StageName::ALL)
}

/// Config with small admission bounds and no job budget
pub fn test_config(max_concurrent: usize, max_queued: usize) -> DelveConfig {
    let mut config = DelveConfig::default();
    config.orchestrator = OrchestratorConfig {
        max_concurrent_jobs: max_concurrent,
        max_queued_jobs: max_queued,
        job_timeout_secs: None,
    };
    config
}

/// Sandbox config running programs with `/bin/sh` under `root`
pub fn shell_sandbox(root: &std::path::Path, timeout_secs: f64) -> SandboxConfig {
    SandboxConfig::shell()
        .with_interpreter("/bin/sh")
        .with_work_root(root)
        .with_timeout_secs(timeout_secs)
}

pub fn sample_spec(title: &str) -> JobSpec {
    JobSpec::new(title, "Sample research job").with_problem("Estimate the answer")
}

/// Read events until the Notifier closes the stream
///
/// Panics if the stream is still open after `limit`.
pub async fn collect_events(subscription: &mut Subscription, limit: Duration) -> Vec<JobEvent> {
    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = subscription.recv().await {
            events.push(event);
        }
    };
    tokio::time::timeout(limit, collect)
        .await
        .expect("event stream did not close in time");
    events
}

/// Progress percentages in arrival order
pub fn progress_values(events: &[JobEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            JobEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}
