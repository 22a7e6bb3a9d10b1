//! Observer-side handle

use delve_core::{JobEvent, JobId};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

/// Identifies one subscription within a job's subscriber set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate new subscriber ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live feed of one job's events
///
/// Dropping the subscription is a disconnect: the Notifier prunes it on the
/// next publish for the job.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    job_id: JobId,
    receiver: mpsc::Receiver<JobEvent>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, job_id: JobId, receiver: mpsc::Receiver<JobEvent>) -> Self {
        Self {
            id,
            job_id,
            receiver,
        }
    }

    /// Subscriber ID, for `Notifier::unsubscribe`
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Observed job
    #[inline]
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next event; `None` once the Notifier dropped this subscriber
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.receiver.recv().await
    }

    /// Next buffered event, if any
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain everything buffered right now
    pub fn drain(&mut self) -> Vec<JobEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for Subscription {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
