//! Persist stage
//!
//! Writes the job's analysis, program and report to the outputs directory as
//! `job_<id>_analysis.json`, `job_<id>_code.<ext>` and `job_<id>_report.md`.
//! Outputs a stage did not produce are skipped.

use crate::stage::Stage;
use async_trait::async_trait;
use delve_core::{Job, StageError, StageName};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Built-in persist stage
#[derive(Debug, Clone)]
pub struct PersistStage {
    dir: PathBuf,
    code_extension: String,
}

impl PersistStage {
    /// Create stage writing into `dir` with program files ending in `.{code_extension}`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, code_extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            code_extension: code_extension.into(),
        }
    }

    /// Output directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, file_name: String, contents: &str) -> Result<String, StageError> {
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, contents).await.map_err(|e| {
            StageError::new(
                StageName::Persist,
                format!("cannot write {}: {e}", path.display()),
            )
        })?;
        debug!(path = %path.display(), "wrote job output");
        Ok(path.display().to_string())
    }
}

fn text_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    match value {
        Value::String(text) => Some(text.as_str()),
        Value::Object(fields) => keys
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str)),
        _ => None,
    }
}

#[async_trait]
impl Stage for PersistStage {
    fn name(&self) -> StageName {
        StageName::Persist
    }

    async fn run(&self, job: &Job) -> Result<Value, StageError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StageError::new(
                StageName::Persist,
                format!("cannot create {}: {e}", self.dir.display()),
            )
        })?;

        let mut files = Map::new();

        if let Some(analysis) = job.stage_output(StageName::Analyze) {
            let text = serde_json::to_string_pretty(analysis)
                .map_err(|e| StageError::new(StageName::Persist, e.to_string()))?;
            let path = self.write(format!("job_{}_analysis.json", job.id), &text).await?;
            files.insert("analysis".into(), Value::String(path));
        }

        if let Some(code) = job
            .stage_output(StageName::Generate)
            .and_then(|generated| text_field(generated, &["code"]))
        {
            let name = format!("job_{}_code.{}", job.id, self.code_extension);
            let path = self.write(name, code).await?;
            files.insert("code".into(), Value::String(path));
        }

        if let Some(report) = job
            .stage_output(StageName::Compose)
            .and_then(|composed| text_field(composed, &["report", "content"]))
        {
            let path = self.write(format!("job_{}_report.md", job.id), report).await?;
            files.insert("report".into(), Value::String(path));
        }

        Ok(json!({ "files": files }))
    }
}
