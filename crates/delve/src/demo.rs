//! Content stages for the `run` command
//!
//! Stand-ins for the model-backed analysis, generation and composition
//! collaborators: they derive their output from the job payload alone.

use delve_core::{Job, StageError, StageName};
use delve_pipeline::{FnStage, Stage};
use serde_json::{json, Value};
use std::sync::Arc;

/// Program run when the caller does not supply one
pub(crate) const DEFAULT_PROGRAM: &str = "print(sum(range(1, 11)))\n";

pub(crate) fn analyze() -> Arc<dyn Stage> {
    Arc::new(FnStage::new(StageName::Analyze, |job: Job| async move {
        let problem = job
            .spec
            .problem_statement
            .clone()
            .unwrap_or_else(|| job.spec.description.clone());
        Ok(json!({
            "problem": problem,
            "kind": job.spec.kind,
            "constraints": job.spec.constraints,
            "approach": format!("solve '{}' numerically", job.spec.title),
        }))
    }))
}

pub(crate) fn generate(program: String) -> Arc<dyn Stage> {
    Arc::new(FnStage::new(StageName::Generate, move |_job: Job| {
        let program = program.clone();
        async move { Ok(json!({ "code": program, "language": "python" })) }
    }))
}

pub(crate) fn compose() -> Arc<dyn Stage> {
    Arc::new(FnStage::new(StageName::Compose, |job: Job| async move {
        let record = job
            .stage_output(StageName::Execute)
            .ok_or_else(|| StageError::new(StageName::Compose, "no execution record"))?;
        Ok(json!({ "report": report(&job, record) }))
    }))
}

fn report(job: &Job, record: &Value) -> String {
    let approach = job
        .stage_output(StageName::Analyze)
        .and_then(|analysis| analysis["approach"].as_str())
        .unwrap_or("not recorded");
    let stdout = record["stdout"].as_str().unwrap_or_default();
    let stderr = record["stderr"].as_str().unwrap_or_default();

    let mut report = format!(
        "# {}\n\n{}\n\n## Approach\n\n{approach}\n\n## Result\n\n```\n{stdout}```\n",
        job.spec.title, job.spec.description
    );
    if !stderr.is_empty() {
        report.push_str(&format!("\n## Diagnostics\n\n```\n{stderr}```\n"));
    }
    report
}
