//! Job lifecycle state machine
//!
//! `pending -> running -> {completed | failed}` and
//! `{pending | running} -> cancelled`. Terminal statuses never change.
//!
//! Two transitions are idempotent rather than conflicting: `Start` on a job
//! that already left `pending`, and `Cancel` on a terminal job. Both leave the
//! record untouched and report that nothing changed.

use crate::error::ValidationError;
use crate::types::{Job, JobId, JobStatus};
use chrono::Utc;

/// A requested lifecycle change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Executor picked the job up
    Start,
    /// Every stage succeeded
    Complete,
    /// A stage failed with this summary
    Fail(String),
    /// Caller cancelled the job
    Cancel,
}

impl Transition {
    /// Status the transition leads to
    #[inline]
    #[must_use]
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Complete => JobStatus::Completed,
            Transition::Fail(_) => JobStatus::Failed,
            Transition::Cancel => JobStatus::Cancelled,
        }
    }

    fn is_noop_from(&self, from: JobStatus) -> bool {
        match self {
            Transition::Start => from != JobStatus::Pending,
            Transition::Cancel => from.is_terminal(),
            Transition::Complete | Transition::Fail(_) => false,
        }
    }
}

/// Statuses reachable in one step
#[must_use]
pub fn allowed_transitions(from: JobStatus) -> Vec<JobStatus> {
    use JobStatus::*;
    match from {
        Pending => vec![Running, Cancelled],
        Running => vec![Completed, Failed, Cancelled],
        Completed | Failed | Cancelled => vec![],
    }
}

/// Validates a status change.
///
/// # Errors
/// `ValidationError::Conflict` when `to` is not reachable from `from`.
pub fn validate_transition(id: JobId, from: JobStatus, to: JobStatus) -> Result<(), ValidationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ValidationError::Conflict { id, from, to })
    }
}

/// Apply a transition to a job record.
///
/// Returns `Ok(true)` when the record changed and `Ok(false)` for an
/// idempotent no-op. Timestamps are set once and never move backwards.
///
/// # Errors
/// `ValidationError::Conflict` for transitions the state machine forbids.
pub fn apply(job: &mut Job, transition: Transition) -> Result<bool, ValidationError> {
    if transition.is_noop_from(job.status) {
        return Ok(false);
    }

    let to = transition.target();
    validate_transition(job.id, job.status, to)?;

    let now = Utc::now().max(job.created_at);
    let started = *job.started_at.get_or_insert(now);

    job.status = to;
    if let Transition::Fail(message) = transition {
        job.error_message = Some(message);
    }
    if to.is_terminal() {
        job.completed_at = Some(now.max(started));
    }
    if to == JobStatus::Completed {
        job.advance_progress(100);
    }
    job.updated_at = now;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobSpec;
    use proptest::prelude::*;

    fn job() -> Job {
        Job::new(JobSpec::new("title", "description"))
    }

    #[test]
    fn happy_path_sets_timestamps_in_order() {
        let mut job = job();
        assert!(apply(&mut job, Transition::Start).unwrap());
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());

        assert!(apply(&mut job, Transition::Complete).unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        let started = job.started_at.unwrap();
        let completed = job.completed_at.unwrap();
        assert!(job.created_at <= started && started <= completed);
    }

    #[test]
    fn start_is_idempotent() {
        let mut job = job();
        assert!(apply(&mut job, Transition::Start).unwrap());
        let started = job.started_at;
        assert!(!apply(&mut job, Transition::Start).unwrap());
        assert_eq!(job.started_at, started);

        apply(&mut job, Transition::Complete).unwrap();
        assert!(!apply(&mut job, Transition::Start).unwrap());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn cancel_is_noop_on_terminal_jobs() {
        let mut job = job();
        assert!(apply(&mut job, Transition::Cancel).unwrap());
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_some(), "leaving pending sets started_at");
        let completed = job.completed_at;

        assert!(!apply(&mut job, Transition::Cancel).unwrap());
        assert_eq!(job.completed_at, completed);
    }

    #[test]
    fn finishing_a_terminal_job_conflicts() {
        let mut job = job();
        apply(&mut job, Transition::Start).unwrap();
        apply(&mut job, Transition::Cancel).unwrap();

        let err = apply(&mut job, Transition::Complete).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Conflict {
                from: JobStatus::Cancelled,
                to: JobStatus::Completed,
                ..
            }
        ));
        assert!(apply(&mut job, Transition::Fail("late".into())).is_err());
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn pending_job_cannot_finish() {
        let mut job = job();
        assert!(apply(&mut job, Transition::Complete).is_err());
        assert!(apply(&mut job, Transition::Fail("x".into())).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn fail_records_message() {
        let mut job = job();
        apply(&mut job, Transition::Start).unwrap();
        apply(&mut job, Transition::Fail("execute stage failed: boom".into())).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("execute stage failed: boom")
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in JobStatus::ALL {
            assert_eq!(status.is_terminal(), allowed_transitions(status).is_empty());
        }
    }

    fn transition_strategy() -> impl Strategy<Value = Transition> {
        prop_oneof![
            Just(Transition::Start),
            Just(Transition::Complete),
            Just(Transition::Fail("boom".into())),
            Just(Transition::Cancel),
        ]
    }

    proptest! {
        #[test]
        fn any_sequence_keeps_lifecycle_invariants(
            transitions in proptest::collection::vec(transition_strategy(), 0..12)
        ) {
            let mut job = job();
            let mut terminal_seen: Option<JobStatus> = None;

            for transition in transitions {
                let _ = apply(&mut job, transition);

                if let Some(first) = terminal_seen {
                    prop_assert_eq!(job.status, first);
                } else if job.status.is_terminal() {
                    terminal_seen = Some(job.status);
                }

                prop_assert_eq!(job.started_at.is_some(), job.status != JobStatus::Pending);
                prop_assert_eq!(job.completed_at.is_some(), job.status.is_terminal());
                prop_assert_eq!(job.error_message.is_some(), job.status == JobStatus::Failed);
                if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
                    prop_assert!(job.created_at <= started);
                    prop_assert!(started <= completed);
                }
            }
        }
    }
}
