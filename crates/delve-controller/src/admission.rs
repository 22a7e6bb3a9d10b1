//! Admission control
//!
//! At most `max_concurrent_jobs` pipelines run at once; up to
//! `max_queued_jobs` more may wait for a run slot. A job holds its admission
//! slot from scheduling until its driver exits, and each job id is scheduled
//! at most once at a time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use delve_core::{JobError, JobId, OrchestratorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Shared admission state
#[derive(Debug)]
pub(crate) struct Admission {
    run_slots: Arc<Semaphore>,
    limit: usize,
    in_flight: AtomicUsize,
    scheduled: DashMap<JobId, Arc<Notify>>,
}

impl Admission {
    pub(crate) fn new(config: &OrchestratorConfig) -> Self {
        Self {
            run_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            limit: config.admission_limit(),
            in_flight: AtomicUsize::new(0),
            scheduled: DashMap::new(),
        }
    }

    /// Reserve a slot for `job_id`
    ///
    /// `Ok(None)` when the job is already scheduled.
    pub(crate) fn admit(self: &Arc<Self>, job_id: JobId) -> Result<Option<Slot>, JobError> {
        let Entry::Vacant(vacant) = self.scheduled.entry(job_id) else {
            return Ok(None);
        };

        let reserved = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.limit).then_some(current + 1)
            });
        if let Err(in_flight) = reserved {
            return Err(JobError::AdmissionRejected { in_flight });
        }

        let cancelled = Arc::new(Notify::new());
        vacant.insert(Arc::clone(&cancelled));
        Ok(Some(Slot {
            admission: Arc::clone(self),
            job_id,
            cancelled,
        }))
    }

    /// Wake a queued driver so it gives up its slot
    pub(crate) fn cancel_queued(&self, job_id: JobId) {
        if let Some(cancelled) = self.scheduled.get(&job_id) {
            cancelled.notify_one();
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn running(&self, max_concurrent: usize) -> usize {
        max_concurrent.saturating_sub(self.run_slots.available_permits())
    }

    pub(crate) fn is_scheduled(&self, job_id: JobId) -> bool {
        self.scheduled.contains_key(&job_id)
    }
}

/// A job's admission reservation; released on drop
#[derive(Debug)]
pub(crate) struct Slot {
    admission: Arc<Admission>,
    job_id: JobId,
    cancelled: Arc<Notify>,
}

impl Slot {
    /// Wait for a run slot; `None` if the job was cancelled while queued
    pub(crate) async fn acquire_run_slot(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            permit = Arc::clone(&self.admission.run_slots).acquire_owned() => permit.ok(),
            () = self.cancelled.notified() => None,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.admission.scheduled.remove(&self.job_id);
        self.admission.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admission(running: usize, queued: usize) -> Arc<Admission> {
        Arc::new(Admission::new(&OrchestratorConfig {
            max_concurrent_jobs: running,
            max_queued_jobs: queued,
            job_timeout_secs: None,
        }))
    }

    #[test]
    fn rejects_beyond_limit_and_frees_on_drop() {
        let admission = admission(1, 1);
        let first = admission.admit(JobId::new()).unwrap().unwrap();
        let _second = admission.admit(JobId::new()).unwrap().unwrap();

        let err = admission.admit(JobId::new()).unwrap_err();
        assert!(matches!(err, JobError::AdmissionRejected { in_flight: 2 }));

        drop(first);
        assert_eq!(admission.in_flight(), 1);
        assert!(admission.admit(JobId::new()).unwrap().is_some());
    }

    #[test]
    fn same_job_is_scheduled_once() {
        let admission = admission(2, 0);
        let id = JobId::new();
        let slot = admission.admit(id).unwrap();
        assert!(slot.is_some());
        assert!(admission.is_scheduled(id));
        assert!(admission.admit(id).unwrap().is_none());
        assert_eq!(admission.in_flight(), 1);

        drop(slot);
        assert!(!admission.is_scheduled(id));
    }

    #[tokio::test]
    async fn queued_slot_gives_up_when_cancelled() {
        let admission = admission(1, 1);
        let running = admission.admit(JobId::new()).unwrap().unwrap();
        let _permit = running.acquire_run_slot().await.unwrap();

        let queued_id = JobId::new();
        let queued = admission.admit(queued_id).unwrap().unwrap();
        admission.cancel_queued(queued_id);
        assert!(queued.acquire_run_slot().await.is_none());
    }
}
