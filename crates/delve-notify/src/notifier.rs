//! Fan-out hub
//!
//! Routes events keyed by job id to every live subscriber of that job.
//! Delivery never waits on a subscriber: each one owns a bounded buffer, and
//! a subscriber whose buffer is full (lagging) or whose receiver is gone
//! (closed) is evicted during the same publish call without affecting the
//! others. Jobs whose subscriber set becomes empty are dropped from the
//! registry, so it only holds jobs somebody is watching.

use crate::subscription::{SubscriberId, Subscription};
use dashmap::DashMap;
use delve_core::{DeliveryError, JobEvent, JobId, JobStatus, NotifierConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Debug)]
struct Slot {
    id: SubscriberId,
    sender: mpsc::Sender<JobEvent>,
}

impl Slot {
    fn deliver(&self, event: &JobEvent) -> Result<(), DeliveryError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Subscriber registry shared by every job
#[derive(Debug)]
pub struct Notifier {
    buffer: usize,
    subscribers: DashMap<JobId, Vec<Slot>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(&NotifierConfig::default())
    }
}

impl Notifier {
    /// Create notifier
    #[must_use]
    pub fn new(config: &NotifierConfig) -> Self {
        Self::with_buffer(config.subscriber_buffer)
    }

    /// Create notifier with a per-subscriber buffer size (minimum 1)
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: DashMap::new(),
        }
    }

    /// Start observing a job
    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = SubscriberId::new();
        self.subscribers
            .entry(job_id)
            .or_default()
            .push(Slot { id, sender });
        debug!(job_id = %job_id, subscriber = %id, "subscriber registered");
        Subscription::new(id, job_id, receiver)
    }

    /// Stop observing a job; `false` if the subscriber was not registered
    pub fn unsubscribe(&self, job_id: JobId, id: SubscriberId) -> bool {
        let removed = match self.subscribers.get_mut(&job_id) {
            Some(mut slots) => {
                let before = slots.len();
                slots.retain(|slot| slot.id != id);
                before != slots.len()
            }
            None => false,
        };
        self.subscribers.remove_if(&job_id, |_, slots| slots.is_empty());
        removed
    }

    /// Deliver an event to every current subscriber of a job
    ///
    /// Returns how many subscribers received it. With no subscribers this is
    /// a no-op; events are never queued for later observers.
    pub fn publish(&self, job_id: JobId, event: &JobEvent) -> usize {
        let mut delivered = 0;
        let now_empty = match self.subscribers.get_mut(&job_id) {
            Some(mut slots) => {
                slots.retain(|slot| match slot.deliver(event) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(DeliveryError::Lagging) => {
                        warn!(job_id = %job_id, subscriber = %slot.id, "evicting lagging subscriber");
                        false
                    }
                    Err(DeliveryError::Closed) => {
                        debug!(job_id = %job_id, subscriber = %slot.id, "pruning closed subscriber");
                        false
                    }
                });
                slots.is_empty()
            }
            None => return 0,
        };
        if now_empty {
            self.subscribers.remove_if(&job_id, |_, slots| slots.is_empty());
        }
        delivered
    }

    /// Publish a progress event
    pub fn publish_progress(&self, job_id: JobId, percent: u8, message: &str) -> usize {
        self.publish(job_id, &JobEvent::progress(percent, message))
    }

    /// Publish a status event
    pub fn publish_status(&self, job_id: JobId, state: JobStatus, detail: Option<String>) -> usize {
        self.publish(job_id, &JobEvent::status(state, detail))
    }

    /// Publish an error event
    pub fn publish_error(&self, job_id: JobId, message: &str) -> usize {
        self.publish(job_id, &JobEvent::error(message))
    }

    /// Drop every subscriber of a job; their streams end after buffered events
    pub fn close_job(&self, job_id: JobId) -> usize {
        self.subscribers
            .remove(&job_id)
            .map_or(0, |(_, slots)| slots.len())
    }

    /// Subscription that yields `events` and then ends
    ///
    /// Not registered, so it never receives live events and needs no pruning.
    /// Used for observers that attach after a job already finished.
    pub fn replay(&self, job_id: JobId, events: Vec<JobEvent>) -> Subscription {
        let (sender, receiver) = mpsc::channel(events.len().max(1));
        for event in events {
            if sender.try_send(event).is_err() {
                break;
            }
        }
        let id = SubscriberId::new();
        debug!(job_id = %job_id, subscriber = %id, "replay subscription created");
        Subscription::new(id, job_id, receiver)
    }

    /// Live subscribers of one job
    #[must_use]
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.subscribers.get(&job_id).map_or(0, |slots| slots.len())
    }

    /// Jobs with at least one registered subscriber
    #[must_use]
    pub fn watched_jobs(&self) -> usize {
        self.subscribers.len()
    }
}
