//! Delve Core - job model for the research-job orchestrator
//!
//! Everything the orchestration crates share:
//! - The job record, its payload, filters and statistics
//! - The lifecycle state machine
//! - Events pushed to observers
//! - The persistence seam and an in-memory store
//! - A hash-chained activity journal
//! - Layered TOML configuration
//!
//! # Example
//!
//! ```rust
//! use delve_core::{state_machine, Job, JobSpec, JobStatus, Transition};
//!
//! let mut job = Job::new(JobSpec::new("Traffic model", "Model rush-hour flow"));
//! state_machine::apply(&mut job, Transition::Start).unwrap();
//! assert_eq!(job.status, JobStatus::Running);
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod event;
pub mod journal;
pub mod state_machine;
pub mod store;
pub mod types;

pub use config::{
    DelveConfig, NotifierConfig, OrchestratorConfig, OutputsConfig, ProgressCheckpoints,
    SandboxConfig,
};
pub use error::{
    ConfigError, DeliveryError, JobError, JournalError, SandboxError, StageError, StoreError,
    ValidationError,
};
pub use event::JobEvent;
pub use journal::{Journal, JournalEntry, JournalLevel};
pub use state_machine::Transition;
pub use store::{JobMutation, JobStore, MemoryStore};
pub use types::{Job, JobFilter, JobId, JobKind, JobSpec, JobStats, JobStatus, StageName};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Delve Core
    pub use crate::{
        DelveConfig, Job, JobError, JobEvent, JobFilter, JobId, JobSpec, JobStatus, JobStore,
        Journal, MemoryStore, StageError, StageName, Transition,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
