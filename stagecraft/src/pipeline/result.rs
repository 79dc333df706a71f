//! Whole-run outcome record.

use crate::core::StageStatus;
use crate::errors::PipelineValidationError;
use crate::stages::StageResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Pseudo stage id reported in `failed_stages` when the graph is rejected.
pub const VALIDATION_STAGE: &str = "validation";

/// Outcome of a pipeline run.
///
/// Callers inspect `success`, `failed_stages` and the `cancelled` /
/// `aborted_by` metadata to tell "done and good" from "done but incomplete"
/// from "aborted".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// True iff every stage succeeded (or was skipped) and the run was not
    /// stopped early.
    pub success: bool,
    /// Outputs of stages that produced a usable value.
    pub outputs: HashMap<String, Value>,
    /// Final result per stage id.
    pub stage_results: HashMap<String, StageResult>,
    /// Failed stage ids, in the order their failure was recorded.
    pub failed_stages: Vec<String>,
    /// Wall-clock duration of the run.
    pub total_duration_ms: f64,
    /// Run metadata (pipeline name, waves, cancellation details).
    pub metadata: HashMap<String, Value>,
}

/// Per-status stage counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Stages that completed.
    pub completed: usize,
    /// Stages whose condition was false.
    pub skipped: usize,
    /// Stages that failed after running.
    pub failed: usize,
    /// Stages never attempted.
    pub not_attempted: usize,
}

impl PipelineResult {
    /// Result for a graph that failed validation. Nothing ran.
    #[must_use]
    pub fn validation_failure(pipeline: &str, error: &PipelineValidationError, duration_ms: f64) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("pipeline".to_string(), Value::String(pipeline.to_string()));
        metadata.insert("validation_error".to_string(), error.to_json());

        Self {
            success: false,
            outputs: HashMap::new(),
            stage_results: HashMap::new(),
            failed_stages: vec![VALIDATION_STAGE.to_string()],
            total_duration_ms: duration_ms,
            metadata,
        }
    }

    /// Returns a stage's output.
    #[must_use]
    pub fn output(&self, id: &str) -> Option<&Value> {
        self.outputs.get(id)
    }

    /// Returns a stage's final result.
    #[must_use]
    pub fn stage_result(&self, id: &str) -> Option<&StageResult> {
        self.stage_results.get(id)
    }

    /// Returns true if the graph was rejected before running.
    #[must_use]
    pub fn is_validation_failure(&self) -> bool {
        self.failed_stages.len() == 1
            && self.failed_stages[0] == VALIDATION_STAGE
            && self.stage_results.is_empty()
    }

    /// Returns true if the run was stopped by cancellation.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.metadata.get("cancelled").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns true if cancellation was requested at any point, including
    /// during the final wave when no later wave was left to skip.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.metadata
            .get("cancel_requested")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the critical stage that aborted the run under fail-fast.
    #[must_use]
    pub fn aborted_by(&self) -> Option<&str> {
        self.metadata.get("aborted_by").and_then(Value::as_str)
    }

    /// Counts stages by outcome.
    #[must_use]
    pub fn counts(&self) -> StageCounts {
        self.stage_results
            .values()
            .fold(StageCounts::default(), |mut counts, result| {
                match result.status {
                    StageStatus::Ok => counts.completed += 1,
                    StageStatus::Skip => counts.skipped += 1,
                    StageStatus::Fail => counts.failed += 1,
                    StageStatus::Cancel => counts.not_attempted += 1,
                }
                counts
            })
    }
}
