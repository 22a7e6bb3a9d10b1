//! Events pushed to job observers
//!
//! Serialized with a `type` tag so a transport can forward them verbatim:
//! `{"type":"progress","percent":30,"message":"generating code"}`.

use crate::types::JobStatus;
use serde::{Deserialize, Serialize};

/// Progress, status or error notification for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Stage boundary reached
    Progress {
        /// 0-100
        percent: u8,
        /// Human-readable stage description
        message: String,
    },
    /// Lifecycle status changed
    Status {
        /// New status
        state: JobStatus,
        /// Optional detail
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Job failed
    Error {
        /// Failure summary
        message: String,
    },
}

impl JobEvent {
    /// Create progress event
    #[inline]
    #[must_use]
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    /// Create status event
    #[inline]
    #[must_use]
    pub fn status(state: JobStatus, detail: Option<String>) -> Self {
        Self::Status { state, detail }
    }

    /// Create error event
    #[inline]
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event announces a terminal status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status { state, .. } if state.is_terminal())
    }
}
