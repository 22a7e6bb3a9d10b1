//! Pipeline Executor
//!
//! Drives a [`Pipeline`] against one running job. Before every stage the job
//! is re-read and the run stops as soon as it is no longer `running`, which
//! is how cooperative cancellation is honored. A stage's output is merged and
//! progress advanced in a single guarded store update that only applies
//! while the job is still running, so output from a stage that finishes
//! after a cancel is discarded rather than persisted.
//!
//! The executor never applies terminal transitions; it reports a
//! [`PipelineOutcome`] and the caller finalizes the job.

use crate::pipeline::Pipeline;
use delve_core::{
    Job, JobId, JobMutation, JobStatus, JobStore, Journal, JournalLevel, ProgressCheckpoints,
    StageError, StageName, StoreError, ValidationError,
};
use delve_notify::Notifier;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Progress message published after the last stage
pub const DONE_MESSAGE: &str = "completed";

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Every stage succeeded; carries the final record
    Completed(Job),
    /// A stage failed; later stages did not run
    Failed(StageError),
    /// The job left `running` underneath the executor
    Halted {
        /// Status observed when the executor stopped
        status: JobStatus,
    },
}

impl PipelineOutcome {
    /// Whether every stage ran
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Runs stages sequentially against persisted job state
pub struct PipelineExecutor {
    pipeline: Pipeline,
    store: Arc<dyn JobStore>,
    notifier: Arc<Notifier>,
    journal: Arc<Journal>,
    checkpoints: ProgressCheckpoints,
}

impl PipelineExecutor {
    /// Create executor
    #[must_use]
    pub fn new(
        pipeline: Pipeline,
        store: Arc<dyn JobStore>,
        notifier: Arc<Notifier>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            pipeline,
            store,
            notifier,
            journal,
            checkpoints: ProgressCheckpoints::default(),
        }
    }

    /// With progress checkpoints
    #[inline]
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: ProgressCheckpoints) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Stages this executor runs
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run every stage against a job that is already `running`
    ///
    /// Stage failures, panics included, come back as
    /// [`PipelineOutcome::Failed`]; they never escape as errors.
    ///
    /// # Errors
    /// `StoreError` when the persistence collaborator fails.
    pub async fn run(&self, job_id: JobId) -> Result<PipelineOutcome, StoreError> {
        let stages = self.pipeline.stages();
        let mut boundary = stages
            .first()
            .map_or(self.checkpoints.done, |stage| self.checkpoints.entering(stage.name()));
        let mut message = stages
            .first()
            .map_or(DONE_MESSAGE, |stage| stage.name().progress_message());

        match self.commit(job_id, move |job| {
            job.advance_progress(boundary);
        })
        .await?
        {
            Ok(job) => self.report_progress(job_id, job.progress, message),
            Err(status) => return Ok(self.halted(job_id, None, status)),
        }

        let mut last = None;
        for (index, stage) in stages.iter().enumerate() {
            let name = stage.name();

            let job = self.store.load_job(job_id).await?;
            if job.status != JobStatus::Running {
                return Ok(self.halted(job_id, Some(name), job.status));
            }

            debug!(job_id = %job_id, stage = %name, "stage started");
            self.journal
                .record(job_id, Some(name), JournalLevel::Info, "stage_started", "");
            let started = Instant::now();

            let output = match AssertUnwindSafe(stage.run(&job)).catch_unwind().await {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => return Ok(self.failed(job_id, err)),
                Err(panic) => {
                    let err = StageError::new(name, format!("panicked: {}", panic_message(&*panic)));
                    return Ok(self.failed(job_id, err));
                }
            };

            match stages.get(index + 1) {
                Some(next) => {
                    boundary = self.checkpoints.entering(next.name());
                    message = next.name().progress_message();
                }
                None => {
                    boundary = self.checkpoints.done;
                    message = DONE_MESSAGE;
                }
            }

            let committed = self
                .commit(job_id, move |job| {
                    job.record_stage_output(name, output);
                    job.advance_progress(boundary);
                })
                .await?;
            match committed {
                Ok(job) => {
                    let elapsed_ms = started.elapsed().as_millis();
                    info!(job_id = %job_id, stage = %name, elapsed_ms, progress = job.progress, "stage completed");
                    self.journal.record(
                        job_id,
                        Some(name),
                        JournalLevel::Info,
                        "stage_completed",
                        format!("{elapsed_ms}ms"),
                    );
                    self.report_progress(job_id, job.progress, message);
                    last = Some(job);
                }
                Err(status) => {
                    warn!(job_id = %job_id, stage = %name, %status, "discarding output of stage that finished after the job stopped");
                    self.journal.record(
                        job_id,
                        Some(name),
                        JournalLevel::Warn,
                        "output_discarded",
                        format!("job is {status}"),
                    );
                    return Ok(PipelineOutcome::Halted { status });
                }
            }
        }

        match last {
            Some(job) => Ok(PipelineOutcome::Completed(job)),
            None => Ok(PipelineOutcome::Completed(self.store.load_job(job_id).await?)),
        }
    }

    /// Apply `edit` only while the job is running
    ///
    /// The inner `Err` carries the status that blocked the update.
    async fn commit<F>(&self, job_id: JobId, edit: F) -> Result<Result<Job, JobStatus>, StoreError>
    where
        F: FnOnce(&mut Job) + Send + 'static,
    {
        let guarded: JobMutation = Box::new(move |job: &mut Job| {
            if job.status != JobStatus::Running {
                return Err(ValidationError::Conflict {
                    id: job.id,
                    from: job.status,
                    to: JobStatus::Running,
                });
            }
            edit(job);
            Ok(())
        });
        match self.store.update_job(job_id, guarded).await {
            Ok(job) => Ok(Ok(job)),
            Err(StoreError::Rejected(ValidationError::Conflict { from, .. })) => Ok(Err(from)),
            Err(e) => Err(e),
        }
    }

    fn report_progress(&self, job_id: JobId, percent: u8, message: &str) {
        let delivered = self.notifier.publish_progress(job_id, percent, message);
        debug!(job_id = %job_id, percent, delivered, "progress published");
    }

    fn halted(&self, job_id: JobId, before: Option<StageName>, status: JobStatus) -> PipelineOutcome {
        info!(job_id = %job_id, stage = ?before, %status, "job no longer running; stopping pipeline");
        self.journal.record(
            job_id,
            before,
            JournalLevel::Warn,
            "pipeline_halted",
            format!("job is {status}"),
        );
        PipelineOutcome::Halted { status }
    }

    fn failed(&self, job_id: JobId, err: StageError) -> PipelineOutcome {
        warn!(job_id = %job_id, stage = %err.stage, error = %err.message, "stage failed");
        self.journal.record(
            job_id,
            Some(err.stage),
            JournalLevel::Error,
            "stage_failed",
            err.message.clone(),
        );
        PipelineOutcome::Failed(err)
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("pipeline", &self.pipeline)
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
