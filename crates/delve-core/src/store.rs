//! Persistence collaborator seam
//!
//! The orchestration core never owns durable storage; it talks to a
//! [`JobStore`]. Stores must serialize concurrent writes to the same job id.
//! [`JobStore::update_job`] is the atomic read-modify-write the Controller and
//! the Pipeline Executor use so that neither clobbers the other's fields.

use crate::error::{StoreError, ValidationError};
use crate::types::{Job, JobFilter, JobId};
use async_trait::async_trait;
use dashmap::DashMap;

/// Guarded in-place edit of a job record
///
/// Returning an error leaves the stored record untouched.
pub type JobMutation = Box<dyn FnOnce(&mut Job) -> Result<(), ValidationError> + Send>;

/// Persistence collaborator
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a job
    async fn load_job(&self, id: JobId) -> Result<Job, StoreError>;

    /// Insert or replace a job
    async fn save_job(&self, job: Job) -> Result<(), StoreError>;

    /// Atomically apply a mutation and return the stored result
    async fn update_job(&self, id: JobId, mutation: JobMutation) -> Result<Job, StoreError>;

    /// Jobs matching a filter, oldest first
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Remove a job; `false` if it did not exist
    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError>;
}

/// In-process store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: DashMap<JobId, Job>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn save_job(&self, mut job: Job) -> Result<(), StoreError> {
        job.touch();
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_job(&self, id: JobId, mutation: JobMutation) -> Result<Job, StoreError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let mut next = entry.value().clone();
        mutation(&mut next)?;
        next.touch();
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by_key(|job| job.id);
        Ok(filter.apply(jobs))
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.jobs.remove(&id).is_some())
    }
}
