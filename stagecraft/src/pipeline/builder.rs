//! Pipeline builder with validation.

use super::dag::{plan_waves, ExecutionPlan};
use super::{PipelineDefinition, StageDefinition};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::sync::Arc;

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    definition: PipelineDefinition,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: PipelineDefinition::new(name),
        }
    }

    /// Adds a sequential stage depending on `inputs`.
    #[must_use]
    pub fn stage(self, id: impl Into<String>, stage: Arc<dyn Stage>, inputs: &[&str]) -> Self {
        let definition = StageDefinition::new(id, stage).with_inputs(inputs.iter().copied());
        self.add_stage(definition)
    }

    /// Adds a fully configured stage definition.
    #[must_use]
    pub fn add_stage(mut self, definition: StageDefinition) -> Self {
        self.definition.stages.push(definition);
        self
    }

    /// Sets the fail-fast policy.
    #[must_use]
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.definition.fail_fast = fail_fast;
        self
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.definition.stages.len()
    }

    /// Validates and returns the pipeline definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty or fails graph validation.
    pub fn build(self) -> Result<PipelineDefinition, PipelineValidationError> {
        self.build_with_plan().map(|(definition, _)| definition)
    }

    /// Validates the pipeline and also returns its wave plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty or fails graph validation.
    pub fn build_with_plan(self) -> Result<(PipelineDefinition, ExecutionPlan), PipelineValidationError> {
        if self.definition.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' must contain at least one stage",
                self.definition.name
            ))
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "Pipeline has no stages")
                    .with_fix_hint("Add at least one stage before building the pipeline."),
            ));
        }

        let plan = plan_waves(&self.definition)?;
        Ok((self.definition, plan))
    }
}
