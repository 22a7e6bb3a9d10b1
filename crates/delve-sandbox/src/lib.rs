//! Delve Sandbox - time-boxed program execution
//!
//! Runs untrusted generated program text in a throwaway working directory
//! with a hard wall-clock budget, capturing output and exit status.
//!
//! The child is killed at the budget and reaped before the run returns.
//! Processes the program itself spawns are not tracked; a program that
//! forks long-lived helpers should `exec` or clean up after itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use delve_sandbox::{CodeRunner, SandboxRunner};
//! use delve_core::SandboxConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = SandboxRunner::new(SandboxConfig::shell());
//! let outcome = runner.run("echo hello", 5.0).await?;
//! assert_eq!(outcome.stdout, "hello\n");
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod outcome;
pub mod runner;

pub use outcome::SandboxOutcome;
pub use runner::{validate_timeout, CodeRunner, SandboxRunner};
