//! Stage interface
//!
//! A stage is one asynchronous step that reads the job's accumulated state
//! and returns its own output fragment. Stages never touch the store or the
//! Notifier; the executor merges the fragment and reports progress.

use async_trait::async_trait;
use delve_core::{Job, StageError, StageName};
use serde_json::Value;
use std::future::Future;

/// One pipeline step
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage slot this implementation fills
    fn name(&self) -> StageName;

    /// Produce this stage's output from the job state so far
    ///
    /// # Errors
    /// `StageError` for a terminal failure; the executor does not retry.
    async fn run(&self, job: &Job) -> Result<Value, StageError>;
}

/// Adapts an async closure into a [`Stage`]
///
/// The closure receives a snapshot of the job so its future can be `'static`.
pub struct FnStage<F> {
    name: StageName,
    func: F,
}

impl<F, Fut> FnStage<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send + 'static,
{
    /// Create stage
    #[inline]
    #[must_use]
    pub fn new(name: StageName, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> std::fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StageError>> + Send + 'static,
{
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, job: &Job) -> Result<Value, StageError> {
        (self.func)(job.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::JobSpec;
    use serde_json::json;

    #[tokio::test]
    async fn fn_stage_sees_job_snapshot() {
        let stage = FnStage::new(StageName::Analyze, |job: Job| async move {
            Ok(json!({ "title": job.spec.title }))
        });
        let job = Job::new(JobSpec::new("Heat flow", "d"));

        assert_eq!(stage.name(), StageName::Analyze);
        assert_eq!(stage.run(&job).await.unwrap(), json!({"title": "Heat flow"}));
    }

    #[tokio::test]
    async fn fn_stage_propagates_failure() {
        let stage = FnStage::new(StageName::Compose, |_job: Job| async move {
            Err(StageError::new(StageName::Compose, "no analysis"))
        });
        let job = Job::new(JobSpec::new("t", "d"));

        let err = stage.run(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "compose stage failed: no analysis");
    }
}
