//! Ordered stage sequence

use crate::stage::Stage;
use crate::stages::{ExecuteStage, PersistStage};
use delve_core::{DelveConfig, StageName};
use delve_sandbox::CodeRunner;
use std::sync::Arc;

/// Pipeline construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// No stages given
    #[error("pipeline has no stages")]
    Empty,

    /// Stages must appear in `analyze, generate, execute, compose, persist` order, each at most once
    #[error("stage {next} cannot follow {previous}")]
    OutOfOrder {
        /// Stage already placed
        previous: StageName,
        /// Offending stage
        next: StageName,
    },
}

/// Stages run by the executor, in fixed order
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Create pipeline from stages in pipeline order
    ///
    /// Any subset of the stage slots may be filled.
    ///
    /// # Errors
    /// `PipelineError` if empty, out of order, or a slot is filled twice.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        for pair in stages.windows(2) {
            let (previous, next) = (pair[0].name(), pair[1].name());
            if previous >= next {
                return Err(PipelineError::OutOfOrder { previous, next });
            }
        }
        Ok(Self { stages })
    }

    /// Full five-stage pipeline
    ///
    /// Analysis, generation and composition content comes from the caller;
    /// execution and persistence use the built-in stages.
    ///
    /// # Errors
    /// `PipelineError::OutOfOrder` if a supplied stage reports the wrong slot.
    pub fn standard(
        analyze: Arc<dyn Stage>,
        generate: Arc<dyn Stage>,
        compose: Arc<dyn Stage>,
        runner: Arc<dyn CodeRunner>,
        config: &DelveConfig,
    ) -> Result<Self, PipelineError> {
        let execute = ExecuteStage::new(runner, config.sandbox.timeout_secs)
            .fail_on_nonzero_exit(config.sandbox.fail_on_nonzero_exit);
        let persist = PersistStage::new(
            config.outputs.dir.clone(),
            config.sandbox.program_extension(),
        );
        Self::new(vec![
            analyze,
            generate,
            Arc::new(execute),
            compose,
            Arc::new(persist),
        ])
    }

    /// Stages in run order
    #[inline]
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Stage names in run order
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Number of stages
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; an empty pipeline cannot be built
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
