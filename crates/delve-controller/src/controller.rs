//! Job Lifecycle Controller
//!
//! The only mutation surface for jobs. The Controller validates and persists
//! submissions, admits them against the concurrency bound, and spawns one
//! background driver per job. The driver moves the job to `running`, runs
//! the Pipeline Executor (optionally under an overall time budget) and
//! applies the terminal transition the outcome calls for. Cancellation only
//! flips the status; the executor notices at its next stage boundary.

use crate::admission::{Admission, Slot};
use delve_core::{
    state_machine, DelveConfig, Job, JobError, JobEvent, JobFilter, JobId, JobSpec, JobStats,
    JobStatus, JobStore, Journal, JournalEntry, JournalLevel, OrchestratorConfig, StoreError,
    Transition, ValidationError,
};
use delve_notify::{Notifier, Subscription};
use delve_pipeline::{Pipeline, PipelineExecutor, PipelineOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Inner {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    notifier: Arc<Notifier>,
    journal: Arc<Journal>,
    executor: PipelineExecutor,
    admission: Arc<Admission>,
}

/// Job Lifecycle Controller
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Create controller with a fresh Notifier and journal
    ///
    /// # Errors
    /// `JobError::Config` when the configuration is out of range.
    pub fn new(
        config: &DelveConfig,
        pipeline: Pipeline,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, JobError> {
        let notifier = Arc::new(Notifier::new(&config.notifier));
        Self::with_notifier(config, pipeline, store, notifier)
    }

    /// Create controller publishing through an existing Notifier
    ///
    /// # Errors
    /// `JobError::Config` when the configuration is out of range.
    pub fn with_notifier(
        config: &DelveConfig,
        pipeline: Pipeline,
        store: Arc<dyn JobStore>,
        notifier: Arc<Notifier>,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let journal = Arc::new(Journal::default());
        let executor = PipelineExecutor::new(
            pipeline,
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&journal),
        )
        .with_checkpoints(config.progress);

        Ok(Self {
            inner: Arc::new(Inner {
                config: config.orchestrator.clone(),
                store,
                notifier,
                journal,
                executor,
                admission: Arc::new(Admission::new(&config.orchestrator)),
            }),
        })
    }

    /// Submit a job and schedule its pipeline
    ///
    /// Returns as soon as the job is persisted and scheduled.
    ///
    /// # Errors
    /// `ValidationError::InvalidSpec` for a bad payload and
    /// `JobError::AdmissionRejected` when the admission bound is reached; in
    /// both cases nothing is persisted.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId, JobError> {
        spec.validate()?;
        let job = Job::new(spec);
        let job_id = job.id;

        let Some(slot) = self.inner.admission.admit(job_id)? else {
            return Err(ValidationError::Conflict {
                id: job_id,
                from: JobStatus::Pending,
                to: JobStatus::Running,
            }
            .into());
        };
        self.persist_new(job).await?;
        self.spawn_driver(job_id, slot);
        Ok(job_id)
    }

    /// Persist a pending job without scheduling it
    ///
    /// # Errors
    /// `ValidationError::InvalidSpec` for a bad payload.
    pub async fn create(&self, spec: JobSpec) -> Result<Job, JobError> {
        spec.validate()?;
        let job = Job::new(spec);
        self.persist_new(job.clone()).await?;
        Ok(job)
    }

    /// Schedule a pending job
    ///
    /// A no-op returning the current record when the job is already
    /// scheduled, running or terminal; a cancelled job is never reopened.
    ///
    /// # Errors
    /// `ValidationError::NotFound` and `JobError::AdmissionRejected`.
    pub async fn start(&self, job_id: JobId) -> Result<Job, JobError> {
        let job = self.inner.store.load_job(job_id).await?;
        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "start ignored; job already left pending");
            return Ok(job);
        }
        match self.inner.admission.admit(job_id)? {
            Some(slot) => {
                self.spawn_driver(job_id, slot);
                info!(job_id = %job_id, "job scheduled");
            }
            None => debug!(job_id = %job_id, "start ignored; job already scheduled"),
        }
        Ok(job)
    }

    /// Fetch a job
    ///
    /// # Errors
    /// `ValidationError::NotFound`.
    pub async fn get(&self, job_id: JobId) -> Result<Job, JobError> {
        Ok(self.inner.store.load_job(job_id).await?)
    }

    /// Cancel a job
    ///
    /// Idempotent: cancelling a terminal job returns it unchanged. Observers
    /// are told immediately; a stage already in flight is not interrupted.
    ///
    /// # Errors
    /// `ValidationError::NotFound`.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, JobError> {
        let current = self.inner.store.load_job(job_id).await?;
        if current.is_terminal() {
            debug!(job_id = %job_id, status = %current.status, "cancel ignored; job already terminal");
            return Ok(current);
        }

        // Status the cancel actually moved the job out of; unset for a no-op.
        let cancelled_from = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&cancelled_from);
        let job = self
            .inner
            .store
            .update_job(
                job_id,
                Box::new(move |job| {
                    let from = job.status;
                    if state_machine::apply(job, Transition::Cancel)? {
                        *slot.lock() = Some(from);
                    }
                    Ok(())
                }),
            )
            .await?;

        let from = *cancelled_from.lock();
        if let Some(from) = from {
            info!(job_id = %job_id, %from, "job cancelled");
            self.inner
                .journal
                .record(job_id, None, JournalLevel::Warn, "cancelled", format!("from {from}"));
            self.inner.admission.cancel_queued(job_id);
            self.announce_terminal(job_id, JobStatus::Cancelled, None);
        }
        Ok(job)
    }

    /// Jobs matching a filter, oldest first
    ///
    /// # Errors
    /// `JobError::Store` when the persistence collaborator fails.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        Ok(self.inner.store.list_jobs(filter).await?)
    }

    /// Job counts per status
    ///
    /// # Errors
    /// `JobError::Store` when the persistence collaborator fails.
    pub async fn stats(&self) -> Result<JobStats, JobError> {
        let jobs = self.inner.store.list_jobs(&JobFilter::all()).await?;
        Ok(JobStats::tally(&jobs))
    }

    /// Activity journal of one job, oldest first
    ///
    /// # Errors
    /// `ValidationError::NotFound`.
    pub async fn journal(&self, job_id: JobId) -> Result<Vec<JournalEntry>, JobError> {
        self.inner.store.load_job(job_id).await?;
        Ok(self.inner.journal.entries_for(job_id))
    }

    /// Observe a job's events
    ///
    /// The stream ends after the job's terminal status event. A job that is
    /// already terminal yields that final status event and ends at once.
    ///
    /// # Errors
    /// `ValidationError::NotFound`.
    pub async fn subscribe(&self, job_id: JobId) -> Result<Subscription, JobError> {
        // Register before reading the status so a job finishing in between
        // still closes this subscription.
        let live = self.inner.notifier.subscribe(job_id);
        let job = match self.inner.store.load_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                self.inner.notifier.unsubscribe(job_id, live.id());
                return Err(e.into());
            }
        };
        if !job.is_terminal() {
            return Ok(live);
        }

        self.inner.notifier.unsubscribe(job_id, live.id());
        debug!(job_id = %job_id, status = %job.status, "late subscriber gets final status only");
        let detail = match job.status {
            JobStatus::Failed => job.error_message,
            _ => None,
        };
        Ok(self
            .inner
            .notifier
            .replay(job_id, vec![JobEvent::status(job.status, detail)]))
    }

    /// Wait until a job reaches a terminal status
    ///
    /// Polls the store; wrap in `tokio::time::timeout` to bound the wait.
    ///
    /// # Errors
    /// `ValidationError::NotFound`.
    pub async fn wait(&self, job_id: JobId) -> Result<Job, JobError> {
        loop {
            let job = self.inner.store.load_job(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Shared Notifier
    #[inline]
    #[must_use]
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.inner.notifier
    }

    /// Shared activity journal
    #[inline]
    #[must_use]
    pub fn activity(&self) -> &Arc<Journal> {
        &self.inner.journal
    }

    /// Jobs holding an admission slot (running or queued)
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.admission.in_flight()
    }

    /// Jobs whose pipeline currently holds a run slot
    #[must_use]
    pub fn running(&self) -> usize {
        self.inner
            .admission
            .running(self.inner.config.max_concurrent_jobs)
    }

    async fn persist_new(&self, job: Job) -> Result<(), JobError> {
        let job_id = job.id;
        let kind = job.spec.kind;
        self.inner.store.save_job(job).await?;
        self.inner
            .journal
            .record(job_id, None, JournalLevel::Info, "created", "");
        info!(job_id = %job_id, ?kind, "job created");
        Ok(())
    }

    fn spawn_driver(&self, job_id: JobId, slot: Slot) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            drive(&inner, job_id, slot).await;
        });
    }

    fn announce_terminal(&self, job_id: JobId, status: JobStatus, detail: Option<String>) {
        announce_terminal(&self.inner, job_id, status, detail);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// Background unit of work for one job
async fn drive(inner: &Inner, job_id: JobId, slot: Slot) {
    let Some(_permit) = slot.acquire_run_slot().await else {
        debug!(job_id = %job_id, "job cancelled while queued");
        return;
    };

    let started = inner
        .store
        .update_job(
            job_id,
            Box::new(|job| {
                if job.status != JobStatus::Pending {
                    return Err(ValidationError::Conflict {
                        id: job.id,
                        from: job.status,
                        to: JobStatus::Running,
                    });
                }
                state_machine::apply(job, Transition::Start).map(|_| ())
            }),
        )
        .await;
    match started {
        Ok(_) => {}
        Err(StoreError::Rejected(e)) => {
            debug!(job_id = %job_id, error = %e, "job not startable; driver exiting");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to start job");
            return;
        }
    }
    info!(job_id = %job_id, "job started");
    inner
        .journal
        .record(job_id, None, JournalLevel::Info, "started", "");
    inner
        .notifier
        .publish_status(job_id, JobStatus::Running, None);

    let run = inner.executor.run(job_id);
    let outcome = match inner.config.job_timeout() {
        Some(budget) => match tokio::time::timeout(budget, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = format!("job exceeded its {}s time budget", budget.as_secs());
                finish(inner, job_id, Transition::Fail(message)).await;
                return;
            }
        },
        None => run.await,
    };

    match outcome {
        Ok(PipelineOutcome::Completed(_)) => finish(inner, job_id, Transition::Complete).await,
        Ok(PipelineOutcome::Failed(err)) => {
            finish(inner, job_id, Transition::Fail(err.to_string())).await;
        }
        Ok(PipelineOutcome::Halted { status }) => {
            debug!(job_id = %job_id, %status, "pipeline halted; nothing to finalize");
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "store failure while running pipeline");
            finish(inner, job_id, Transition::Fail(format!("store error: {e}"))).await;
        }
    }
}

/// Apply a terminal transition and tell observers
async fn finish(inner: &Inner, job_id: JobId, transition: Transition) {
    let target = transition.target();
    let message = match &transition {
        Transition::Fail(message) => Some(message.clone()),
        _ => None,
    };

    let applied = inner
        .store
        .update_job(
            job_id,
            Box::new(move |job| state_machine::apply(job, transition).map(|_| ())),
        )
        .await;
    match applied {
        Ok(job) => {
            let level = if target == JobStatus::Completed {
                info!(job_id = %job_id, "job completed");
                JournalLevel::Info
            } else {
                warn!(job_id = %job_id, error = ?job.error_message, "job failed");
                JournalLevel::Error
            };
            inner.journal.record(
                job_id,
                None,
                level,
                target.as_str(),
                message.clone().unwrap_or_default(),
            );
            if let Some(message) = &message {
                inner.notifier.publish_error(job_id, message);
            }
            announce_terminal(inner, job_id, target, message);
        }
        Err(StoreError::Rejected(e)) => {
            debug!(job_id = %job_id, error = %e, "job already terminal; outcome dropped");
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to finalize job");
        }
    }
}

/// Publish the terminal status and end the job's event streams
fn announce_terminal(inner: &Inner, job_id: JobId, status: JobStatus, detail: Option<String>) {
    inner.notifier.publish_status(job_id, status, detail);
    let closed = inner.notifier.close_job(job_id);
    debug!(job_id = %job_id, %status, closed, "event streams closed");
}
