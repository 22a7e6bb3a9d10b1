//! Core types for Delve
//!
//! Defines the fundamental types of the orchestration core:
//! - Job identity, status and kind
//! - Pipeline stage names
//! - The submitted job payload and the persisted job record
//! - List filters and aggregate statistics

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::OnceLock;
use ulid::{Generator, Ulid};

/// Unique job identifier (ULID, so ids sort by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Ulid);

static ID_GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

impl JobId {
    /// Generate new job ID
    ///
    /// Ids from one process are strictly increasing, even within the same
    /// millisecond.
    #[must_use]
    pub fn new() -> Self {
        let generator = ID_GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
        let ulid = generator.lock().generate().unwrap_or_else(|_| Ulid::new());
        Self(ulid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| ValidationError::InvalidSpec(format!("invalid job id '{s}': {e}")))
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by an executor
    Pending,
    /// Pipeline is running
    Running,
    /// All stages succeeded
    Completed,
    /// A stage failed; `error_message` holds the cause
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Terminal statuses never change again
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidSpec(format!("unknown job status '{s}'")))
    }
}

/// Kind of research job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Build and solve a mathematical model
    #[default]
    MathModeling,
    /// Analyze a supplied data set
    DataAnalysis,
    /// Solve an optimization problem
    Optimization,
    /// Run a simulation study
    Simulation,
}

impl JobKind {
    /// All kinds
    pub const ALL: [JobKind; 4] = [
        JobKind::MathModeling,
        JobKind::DataAnalysis,
        JobKind::Optimization,
        JobKind::Simulation,
    ];

    /// Stable snake_case name, matching the serialized form
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::MathModeling => "math_modeling",
            JobKind::DataAnalysis => "data_analysis",
            JobKind::Optimization => "optimization",
            JobKind::Simulation => "simulation",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidSpec(format!("unknown job kind '{s}'")))
    }
}

/// One pipeline step
///
/// Variants are declared in pipeline order, so the derived `Ord` sorts
/// stage state the way the pipeline produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Problem analysis
    Analyze,
    /// Program generation
    Generate,
    /// Sandboxed program execution
    Execute,
    /// Report composition
    Compose,
    /// Output persistence
    Persist,
}

impl StageName {
    /// The fixed pipeline order
    pub const ALL: [StageName; 5] = [
        StageName::Analyze,
        StageName::Generate,
        StageName::Execute,
        StageName::Compose,
        StageName::Persist,
    ];

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Analyze => "analyze",
            StageName::Generate => "generate",
            StageName::Execute => "execute",
            StageName::Compose => "compose",
            StageName::Persist => "persist",
        }
    }

    /// Progress message shown to observers when the stage starts
    #[must_use]
    pub fn progress_message(self) -> &'static str {
        match self {
            StageName::Analyze => "analyzing problem",
            StageName::Generate => "generating code",
            StageName::Execute => "executing code",
            StageName::Compose => "composing report",
            StageName::Persist => "saving outputs",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submitted job payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobSpec {
    /// Short title
    pub title: String,
    /// Free-form description
    pub description: String,
    /// Job kind
    #[serde(default)]
    pub kind: JobKind,
    /// Problem statement handed to the analysis stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_statement: Option<String>,
    /// Constraints handed to the analysis stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    /// Structured input data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<serde_json::Value>,
    /// Per-job stage configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl JobSpec {
    /// Create new spec
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// With job kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    /// With problem statement
    #[inline]
    #[must_use]
    pub fn with_problem(mut self, statement: impl Into<String>) -> Self {
        self.problem_statement = Some(statement.into());
        self
    }

    /// With constraints
    #[inline]
    #[must_use]
    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }

    /// With input data
    #[inline]
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input_data = Some(input);
        self
    }

    /// Reject specs that cannot describe a job
    ///
    /// # Errors
    /// `ValidationError::InvalidSpec` when the title or description is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::InvalidSpec("title must not be blank".into()));
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::InvalidSpec(
                "description must not be blank".into(),
            ));
        }
        Ok(())
    }
}

/// Persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Immutable identity
    pub id: JobId,
    /// Submitted payload
    pub spec: JobSpec,
    /// Lifecycle status
    pub status: JobStatus,
    /// Last output of each stage that has succeeded
    pub stage_state: BTreeMap<StageName, serde_json::Value>,
    /// 0-100, non-decreasing
    pub progress: u8,
    /// Present only when `status` is `Failed`
    pub error_message: Option<String>,
    /// Set at creation
    pub created_at: DateTime<Utc>,
    /// Bumped on every persisted mutation
    pub updated_at: DateTime<Utc>,
    /// Set when the job first leaves `Pending`
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job for a spec
    #[must_use]
    pub fn new(spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            spec,
            status: JobStatus::Pending,
            stage_state: BTreeMap::new(),
            progress: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the job reached a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Output recorded by a stage, if it ran
    #[inline]
    #[must_use]
    pub fn stage_output(&self, stage: StageName) -> Option<&serde_json::Value> {
        self.stage_state.get(&stage)
    }

    /// Raise progress; lower values are ignored and 100 is the ceiling
    ///
    /// Returns the progress after the update.
    pub fn advance_progress(&mut self, percent: u8) -> u8 {
        self.progress = self.progress.max(percent.min(100));
        self.progress
    }

    /// Merge a stage output into the stage state
    pub fn record_stage_output(&mut self, stage: StageName, output: serde_json::Value) {
        self.stage_state.insert(stage, output);
    }

    /// Mark the record as modified now
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Filter for listing jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Only jobs in this status
    pub status: Option<JobStatus>,
    /// Only jobs of this kind
    pub kind: Option<JobKind>,
    /// Case-insensitive title substring
    pub title_contains: Option<String>,
    /// Number of matching jobs to skip
    pub offset: usize,
    /// Maximum number of jobs to return
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Match every job
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// With title substring
    #[inline]
    #[must_use]
    pub fn with_title(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    /// With page window
    #[inline]
    #[must_use]
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Check a single job against the predicates (ignores the page window)
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        if self.status.is_some_and(|status| status != job.status) {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != job.spec.kind) {
            return false;
        }
        if let Some(needle) = &self.title_contains {
            if !job
                .spec
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }

    /// Apply predicates and page window to jobs already sorted by id
    pub fn apply<I>(&self, jobs: I) -> Vec<Job>
    where
        I: IntoIterator<Item = Job>,
    {
        let matching = jobs
            .into_iter()
            .filter(|job| self.matches(job))
            .skip(self.offset);
        match self.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}

/// Job counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// All jobs known to the store
    pub total: usize,
    /// Count per status; statuses with no jobs are absent
    pub by_status: BTreeMap<JobStatus, usize>,
}

impl JobStats {
    /// Tally a set of jobs
    pub fn tally<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut stats = Self::default();
        for job in jobs {
            stats.total += 1;
            *stats.by_status.entry(job.status).or_insert(0) += 1;
        }
        stats
    }

    /// Count for one status
    #[inline]
    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<JobId>().is_err());
    }

    #[test]
    fn job_ids_strictly_increase() {
        let ids: Vec<JobId> = (0..100).map(|_| JobId::new()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_parses_from_wire_name() {
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn kind_name_matches_serialized_form() {
        for kind in JobKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn stage_state_iterates_in_pipeline_order() {
        let mut job = Job::new(JobSpec::new("t", "d"));
        job.record_stage_output(StageName::Compose, json!("report"));
        job.record_stage_output(StageName::Analyze, json!({"a": 1}));
        job.record_stage_output(StageName::Execute, json!({"ok": true}));

        let order: Vec<StageName> = job.stage_state.keys().copied().collect();
        assert_eq!(
            order,
            vec![StageName::Analyze, StageName::Execute, StageName::Compose]
        );
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = Job::new(JobSpec::new("t", "d"));
        assert_eq!(job.advance_progress(30), 30);
        assert_eq!(job.advance_progress(10), 30);
        assert_eq!(job.advance_progress(250), 100);
    }

    #[test]
    fn spec_validation_rejects_blank_fields() {
        assert!(JobSpec::new("title", "desc").validate().is_ok());
        assert!(JobSpec::new("  ", "desc").validate().is_err());
        assert!(JobSpec::new("title", "").validate().is_err());
    }

    #[test]
    fn filter_matches_and_pages() {
        let mut a = Job::new(JobSpec::new("Traffic flow", "d").with_kind(JobKind::Simulation));
        a.status = JobStatus::Completed;
        let b = Job::new(JobSpec::new("Crop yield", "d"));
        let c = Job::new(JobSpec::new("Traffic lights", "d"));

        let jobs = vec![a.clone(), b.clone(), c.clone()];

        let traffic = JobFilter::all().with_title("TRAFFIC").apply(jobs.clone());
        assert_eq!(traffic.len(), 2);

        let pending = JobFilter::all().with_status(JobStatus::Pending).apply(jobs.clone());
        assert_eq!(pending, vec![b.clone(), c.clone()]);

        let sims = JobFilter::all().with_kind(JobKind::Simulation).apply(jobs.clone());
        assert_eq!(sims, vec![a]);

        let page = JobFilter::all().page(1, 1).apply(jobs);
        assert_eq!(page, vec![b]);
    }

    #[test]
    fn stats_tally() {
        let mut done = Job::new(JobSpec::new("a", "d"));
        done.status = JobStatus::Completed;
        let pending = Job::new(JobSpec::new("b", "d"));
        let other = Job::new(JobSpec::new("c", "d"));

        let stats = JobStats::tally([&done, &pending, &other]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(JobStatus::Pending), 2);
        assert_eq!(stats.count(JobStatus::Completed), 1);
        assert_eq!(stats.count(JobStatus::Failed), 0);
    }
}
