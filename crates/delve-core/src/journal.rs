//! Append-only activity journal
//!
//! Records lifecycle transitions and stage activity for every job. Entries
//! are hash-chained (SHA-256 over the entry fields plus the previous hash) so
//! tampering with a retained entry is detectable. The journal keeps a bounded
//! window; evicting the oldest entry moves the chain anchor forward.

use crate::error::JournalError;
use crate::types::{JobId, StageName};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Default number of retained entries
pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

/// Severity of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalLevel {
    /// Normal progress
    Info,
    /// Something was discarded or skipped
    Warn,
    /// A failure
    Error,
}

impl JournalLevel {
    fn as_u8(self) -> u8 {
        match self {
            JournalLevel::Info => 0,
            JournalLevel::Warn => 1,
            JournalLevel::Error => 2,
        }
    }
}

/// One recorded activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 0
    pub seq: u64,
    /// Job the activity belongs to
    pub job_id: JobId,
    /// Stage, for stage activity
    pub stage: Option<StageName>,
    /// Severity
    pub level: JournalLevel,
    /// Short action name
    pub action: String,
    /// Free-form detail
    pub detail: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Hash of the previous entry
    pub prev_hash: [u8; 32],
    /// Hash of this entry
    pub hash: [u8; 32],
}

#[derive(Debug)]
struct Chain {
    entries: VecDeque<JournalEntry>,
    next_seq: u64,
    anchor: [u8; 32],
    last_hash: [u8; 32],
}

/// Bounded, hash-chained journal shared by the Controller and the Executor
#[derive(Debug)]
pub struct Journal {
    capacity: usize,
    inner: Mutex<Chain>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl Journal {
    /// Create journal retaining at most `capacity` entries (minimum 1)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Chain {
                entries: VecDeque::new(),
                next_seq: 0,
                anchor: [0u8; 32],
                last_hash: [0u8; 32],
            }),
        }
    }

    /// Append an entry and return its sequence number
    pub fn record(
        &self,
        job_id: JobId,
        stage: Option<StageName>,
        level: JournalLevel,
        action: &str,
        detail: impl Into<String>,
    ) -> u64 {
        let mut chain = self.inner.lock();
        let mut entry = JournalEntry {
            seq: chain.next_seq,
            job_id,
            stage,
            level,
            action: action.to_string(),
            detail: detail.into(),
            timestamp: Utc::now(),
            prev_hash: chain.last_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);

        chain.last_hash = entry.hash;
        chain.next_seq += 1;
        chain.entries.push_back(entry);
        while chain.entries.len() > self.capacity {
            if let Some(evicted) = chain.entries.pop_front() {
                trace!(seq = evicted.seq, "journal entry evicted");
                chain.anchor = evicted.hash;
            }
        }
        chain.next_seq - 1
    }

    /// All retained entries, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Retained entries for one job, oldest first
    #[must_use]
    pub fn entries_for(&self, job_id: JobId) -> Vec<JournalEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Number of retained entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Re-derive the chain over the retained window
    ///
    /// # Errors
    /// `JournalError::IntegrityViolation` naming the first bad entry.
    pub fn verify_integrity(&self) -> Result<(), JournalError> {
        let chain = self.inner.lock();
        let mut prev = chain.anchor;
        for entry in &chain.entries {
            if entry.prev_hash != prev || entry.hash != compute_hash(entry) {
                warn!(seq = entry.seq, job_id = %entry.job_id, "journal integrity violation");
                return Err(JournalError::IntegrityViolation { seq: entry.seq });
            }
            prev = entry.hash;
        }
        Ok(())
    }
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.job_id.0.to_bytes());
    hasher.update(entry.stage.map_or("", StageName::as_str).as_bytes());
    hasher.update([0]);
    hasher.update([entry.level.as_u8()]);
    hasher.update(entry.action.as_bytes());
    hasher.update([0]);
    hasher.update(entry.detail.as_bytes());
    hasher.update([0]);
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}
