//! Error types for Delve
//!
//! Provides the error taxonomy of the orchestration core:
//! - Validation failures returned synchronously to the Controller's caller
//! - Stage failures, converted into a failed job by the Pipeline Executor
//! - Sandbox failures (bad budget, timeout, launch)
//! - Subscriber delivery failures, contained inside the Notifier
//! - Persistence and configuration failures

use crate::types::{JobId, JobStatus, StageName};
use std::path::PathBuf;

/// Bad input to a Controller operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No job with this id
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Transition not allowed from the job's current status
    #[error("job {id} is {from}; cannot move to {to}")]
    Conflict {
        /// Job the transition was attempted on
        id: JobId,
        /// Status at the time of the attempt
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// Submitted payload is unusable
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),
}

/// A pipeline stage failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} stage failed: {message}")]
pub struct StageError {
    /// Stage that failed
    pub stage: StageName,
    /// Human-readable cause
    pub message: String,
}

impl StageError {
    /// Create stage error
    #[inline]
    #[must_use]
    pub fn new(stage: StageName, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Sandbox execution errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Budget must be a positive, finite number of seconds
    #[error("invalid timeout: {0}s (must be > 0)")]
    InvalidTimeout(f64),

    /// Program exceeded its budget and was killed
    #[error("execution timed out after {secs}s")]
    Timeout {
        /// The budget that elapsed
        secs: f64,
    },

    /// Child process could not be started
    #[error("failed to launch program: {0}")]
    Launch(String),

    /// Scratch workspace could not be prepared
    #[error("sandbox workspace error at {path}: {source}")]
    Workspace {
        /// Path being prepared
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    /// Create workspace error for path
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// A subscriber sink could not take an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Observer hung up
    #[error("subscriber closed")]
    Closed,

    /// Observer stopped draining its buffer
    #[error("subscriber lagging (buffer full)")]
    Lagging,
}

/// Persistence collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No record with this id
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A guarded update refused to apply
    #[error("update rejected: {0}")]
    Rejected(#[from] ValidationError),

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Journal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    /// An entry's hash or back-link does not match
    #[error("journal integrity violation at entry {seq}")]
    IntegrityViolation {
        /// First entry that failed verification
        seq: u64,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed values are out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the Controller
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Caller input was invalid
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persistence failed
    #[error("store error: {0}")]
    Store(StoreError),

    /// Admission bound reached
    #[error("admission rejected: {in_flight} jobs already queued or running")]
    AdmissionRejected {
        /// Jobs scheduled at the time of the attempt
        in_flight: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl JobError {
    /// Check if the job does not exist
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Validation(ValidationError::NotFound(_)))
    }

    /// Check if the error is a state conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Validation(ValidationError::Conflict { .. }))
    }

    /// Check if retrying later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRejected { .. } | Self::Store(StoreError::Backend(_))
        )
    }
}

impl From<StoreError> for JobError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::Validation(ValidationError::NotFound(id)),
            StoreError::Rejected(e) => Self::Validation(e),
            other @ StoreError::Backend(_) => Self::Store(other),
        }
    }
}
