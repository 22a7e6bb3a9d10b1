//! Delve Controller - job lifecycle
//!
//! Owns the job state machine on behalf of callers:
//! - `submit` validates, persists and schedules a job, then returns
//! - one background driver per job runs the pipeline and finalizes the job
//! - `cancel` is cooperative and idempotent
//! - admission bounds how many jobs run and wait at once
//!
//! # Example
//!
//! ```rust,ignore
//! use delve_controller::Controller;
//!
//! let controller = Controller::new(&config, pipeline, Arc::new(MemoryStore::new()))?;
//! let id = controller.submit(JobSpec::new("Traffic model", "Model rush-hour flow")).await?;
//! let mut events = controller.subscribe(id).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

#![warn(unreachable_pub)]

mod admission;
pub mod controller;

pub use controller::Controller;
