//! Delve Pipeline - sequential stage execution
//!
//! A job runs through `analyze -> generate -> execute -> compose -> persist`.
//! Each [`Stage`] turns the job's accumulated state into one output fragment;
//! the [`PipelineExecutor`] merges fragments, reports progress at fixed
//! checkpoints and stops at the first failure or when the job is cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use delve_pipeline::{FnStage, Pipeline, PipelineExecutor};
//!
//! let analyze = Arc::new(FnStage::new(StageName::Analyze, |job: Job| async move {
//!     Ok(json!({ "summary": job.spec.description }))
//! }));
//! let executor = PipelineExecutor::new(Pipeline::new(vec![analyze])?, store, notifier, journal);
//! let outcome = executor.run(job_id).await?;
//! ```

#![warn(unreachable_pub)]

pub mod executor;
pub mod pipeline;
pub mod stage;
pub mod stages;

pub use executor::{PipelineExecutor, PipelineOutcome, DONE_MESSAGE};
pub use pipeline::{Pipeline, PipelineError};
pub use stage::{FnStage, Stage};
pub use stages::{ExecuteStage, PersistStage};
