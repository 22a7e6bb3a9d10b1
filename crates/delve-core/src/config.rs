//! Delve configuration
//!
//! One TOML document with a table per component:
//!
//! ```toml
//! [orchestrator]
//! max_concurrent_jobs = 5
//! max_queued_jobs = 100
//! job_timeout_secs = 3600
//!
//! [sandbox]
//! interpreter = "python3"
//! program_file = "main.py"
//! timeout_secs = 300.0
//! fail_on_nonzero_exit = false
//!
//! [notifier]
//! subscriber_buffer = 256
//!
//! [progress]
//! analyze = 10
//! generate = 30
//! execute = 60
//! compose = 80
//! persist = 90
//! done = 100
//!
//! [outputs]
//! dir = "outputs"
//! ```
//!
//! Every field has a default, so an empty document is a valid config.

use crate::error::ConfigError;
use crate::types::StageName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelveConfig {
    /// Controller and admission settings
    pub orchestrator: OrchestratorConfig,
    /// Sandbox Runner settings
    pub sandbox: SandboxConfig,
    /// Notifier settings
    pub notifier: NotifierConfig,
    /// Progress checkpoints per stage boundary
    pub progress: ProgressCheckpoints,
    /// Where the persist stage writes
    pub outputs: OutputsConfig,
}

impl DelveConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed TOML, `ConfigError::Invalid` for
    /// out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` when the file cannot be read, otherwise as
    /// [`DelveConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `ConfigError::Invalid` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// With max concurrent jobs
    #[inline]
    #[must_use]
    pub fn with_max_jobs(mut self, max: usize) -> Self {
        self.orchestrator.max_concurrent_jobs = max;
        self
    }

    /// With sandbox settings
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// With outputs directory
    #[inline]
    #[must_use]
    pub fn with_outputs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.outputs.dir = dir.into();
        self
    }

    /// Check value ranges across all sections
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.orchestrator.validate()?;
        self.sandbox.validate()?;
        self.notifier.validate()?;
        self.progress.validate()
    }
}

/// Controller and admission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Jobs whose pipelines may run at once
    pub max_concurrent_jobs: usize,
    /// Jobs that may wait for a slot; 0 rejects as soon as all slots are busy
    pub max_queued_jobs: usize,
    /// Wall-clock budget for a whole pipeline run
    pub job_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            max_queued_jobs: 100,
            job_timeout_secs: Some(3600),
        }
    }
}

impl OrchestratorConfig {
    /// Maximum number of jobs scheduled (running plus queued)
    #[inline]
    #[must_use]
    pub fn admission_limit(&self) -> usize {
        self.max_concurrent_jobs.saturating_add(self.max_queued_jobs)
    }

    /// Pipeline budget as a duration
    #[inline]
    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs < 1 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "orchestrator.job_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Sandbox Runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Program used to run the materialized file
    pub interpreter: String,
    /// Arguments placed before the program file
    pub interpreter_args: Vec<String>,
    /// File name the program text is written to
    pub program_file: String,
    /// Parent directory for scratch workspaces (system temp dir when unset)
    pub work_root: Option<PathBuf>,
    /// Default budget used by the execute stage
    pub timeout_secs: f64,
    /// Start the child with an empty environment plus `env`
    pub clear_env: bool,
    /// Extra environment variables for the child
    pub env: BTreeMap<String, String>,
    /// How long to keep draining output pipes after a kill
    pub kill_grace_ms: u64,
    /// Fail the execute stage when the program exits unsuccessfully
    ///
    /// Off by default: the outcome is recorded and the next stage decides.
    pub fail_on_nonzero_exit: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            interpreter_args: Vec::new(),
            program_file: "main.py".into(),
            work_root: None,
            timeout_secs: 300.0,
            clear_env: false,
            env: BTreeMap::new(),
            kill_grace_ms: 500,
            fail_on_nonzero_exit: false,
        }
    }
}

impl SandboxConfig {
    /// Run programs with a POSIX shell
    #[must_use]
    pub fn shell() -> Self {
        Self {
            interpreter: "sh".into(),
            program_file: "main.sh".into(),
            ..Self::default()
        }
    }

    /// With interpreter
    #[inline]
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// With default timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// With strict exit handling in the execute stage
    #[inline]
    #[must_use]
    pub fn with_fail_on_nonzero_exit(mut self, enabled: bool) -> Self {
        self.fail_on_nonzero_exit = enabled;
        self
    }

    /// With scratch root directory
    #[inline]
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// File extension of the program file, without the dot
    #[must_use]
    pub fn program_extension(&self) -> &str {
        Path::new(&self.program_file)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("txt")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::Invalid("sandbox.interpreter must not be blank".into()));
        }
        if self.program_file.trim().is_empty() || self.program_file.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(
                "sandbox.program_file must be a plain file name".into(),
            ));
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(ConfigError::Invalid("sandbox.timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Notifier settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Events buffered per subscriber before it is evicted as lagging
    pub subscriber_buffer: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

impl NotifierConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.subscriber_buffer < 1 {
            return Err(ConfigError::Invalid(
                "notifier.subscriber_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Progress reported at each stage boundary
///
/// A stage's value is reported when the pipeline reaches the boundary in
/// front of it; `done` is reported after the last stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressCheckpoints {
    /// Entering analyze
    pub analyze: u8,
    /// Entering generate
    pub generate: u8,
    /// Entering execute
    pub execute: u8,
    /// Entering compose
    pub compose: u8,
    /// Entering persist
    pub persist: u8,
    /// After the last stage
    pub done: u8,
}

impl Default for ProgressCheckpoints {
    fn default() -> Self {
        Self {
            analyze: 10,
            generate: 30,
            execute: 60,
            compose: 80,
            persist: 90,
            done: 100,
        }
    }
}

impl ProgressCheckpoints {
    /// Value reported when entering a stage
    #[inline]
    #[must_use]
    pub fn entering(&self, stage: StageName) -> u8 {
        match stage {
            StageName::Analyze => self.analyze,
            StageName::Generate => self.generate,
            StageName::Execute => self.execute,
            StageName::Compose => self.compose,
            StageName::Persist => self.persist,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sequence = [
            self.analyze,
            self.generate,
            self.execute,
            self.compose,
            self.persist,
            self.done,
        ];
        if sequence.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(ConfigError::Invalid(
                "progress checkpoints must be non-decreasing in stage order".into(),
            ));
        }
        if self.done != 100 {
            return Err(ConfigError::Invalid("progress.done must be 100".into()));
        }
        Ok(())
    }
}

/// Persist stage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    /// Directory receiving per-job output files
    pub dir: PathBuf,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DelveConfig::from_toml_str("").unwrap();
        assert_eq!(config, DelveConfig::default());
        assert_eq!(config.orchestrator.max_concurrent_jobs, 5);
        assert_eq!(config.progress.entering(StageName::Execute), 60);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = DelveConfig::from_toml_str(
            r#"
            [orchestrator]
            max_concurrent_jobs = 2

            [sandbox]
            interpreter = "sh"
            program_file = "run.sh"
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.max_concurrent_jobs, 2);
        assert_eq!(config.orchestrator.max_queued_jobs, 100);
        assert_eq!(config.sandbox.interpreter, "sh");
        assert_eq!(config.sandbox.program_extension(), "sh");
        assert_eq!(config.sandbox.kill_grace_ms, 500);
        assert!(!config.sandbox.fail_on_nonzero_exit);
    }

    #[test]
    fn strict_exit_handling_is_configurable() {
        let config =
            DelveConfig::from_toml_str("[sandbox]
fail_on_nonzero_exit = true
").unwrap();
        assert!(config.sandbox.fail_on_nonzero_exit);
        assert_eq!(config.sandbox.timeout_secs, 300.0);

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("fail_on_nonzero_exit = true"), "{rendered}");
    }

    #[test]
    fn rejects_out_of_range_values() {
        let zero_jobs = "[orchestrator]\nmax_concurrent_jobs = 0\n";
        assert!(matches!(
            DelveConfig::from_toml_str(zero_jobs),
            Err(ConfigError::Invalid(_))
        ));

        let bad_timeout = "[sandbox]\ntimeout_secs = 0.0\n";
        assert!(DelveConfig::from_toml_str(bad_timeout).is_err());

        let decreasing = "[progress]\ngenerate = 5\n";
        assert!(DelveConfig::from_toml_str(decreasing).is_err());

        let short_done = "[progress]\ndone = 95\n";
        assert!(DelveConfig::from_toml_str(short_done).is_err());

        let nested_file = "[sandbox]\nprogram_file = \"../x.py\"\n";
        assert!(DelveConfig::from_toml_str(nested_file).is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            DelveConfig::from_toml_str("[orchestrator"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn default_config_renders_and_reparses() {
        let rendered = DelveConfig::default().to_toml_string().unwrap();
        let reparsed = DelveConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, DelveConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delve.toml");
        std::fs::write(&path, "[notifier]\nsubscriber_buffer = 8\n").unwrap();

        let config = DelveConfig::load(&path).unwrap();
        assert_eq!(config.notifier.subscriber_buffer, 8);

        let missing = DelveConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn admission_limit_adds_queue() {
        let config = OrchestratorConfig {
            max_concurrent_jobs: 2,
            max_queued_jobs: 3,
            job_timeout_secs: None,
        };
        assert_eq!(config.admission_limit(), 5);
        assert_eq!(config.job_timeout(), None);
    }
}
