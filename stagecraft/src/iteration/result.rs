//! Iteration outcome and decision trace.

use super::{IterationState, JudgeVerdict, RevisionRequest, StateTransition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened in one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based iteration number.
    pub iteration: u32,
    /// The plan produced, if the planner succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    /// Validator errors for the plan.
    #[serde(default)]
    pub validation_errors: Vec<String>,
    /// The judge's verdict, if the plan was judged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<JudgeVerdict>,
    /// The revision request built from the verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_request: Option<RevisionRequest>,
    /// Tokens used by the planner in this iteration.
    pub planner_tokens: u64,
    /// Tokens used by the judge in this iteration.
    pub judge_tokens: u64,
    /// State the loop was in when the iteration ended.
    pub state: IterationState,
}

impl IterationRecord {
    /// Creates an empty record for `iteration`.
    #[must_use]
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            ..Self::default()
        }
    }

    /// Tokens used in this iteration.
    #[must_use]
    pub const fn tokens_used(&self) -> u64 {
        self.planner_tokens + self.judge_tokens
    }
}

/// Outcome of an iteration run.
///
/// Every termination path produces one of these; `termination_reason` is
/// always a terminal [`IterationState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    /// True iff the loop ended `Complete`.
    pub success: bool,
    /// The last plan produced, possibly unapproved or invalid.
    pub final_plan: Option<Value>,
    /// The terminal state.
    pub termination_reason: IterationState,
    /// Number of iterations started.
    pub iterations: u32,
    /// Planner plus judge tokens over the whole run.
    pub tokens_used: u64,
    /// Every parsed verdict, in order.
    pub verdicts: Vec<JudgeVerdict>,
    /// Every revision request, in order.
    pub revision_requests: Vec<RevisionRequest>,
    /// Per-iteration decision trace.
    pub trace: Vec<IterationRecord>,
    /// Every state transition taken.
    pub transitions: Vec<StateTransition>,
    /// Error message for `Failed` runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IterationResult {
    /// Returns the last verdict.
    #[must_use]
    pub fn final_verdict(&self) -> Option<&JudgeVerdict> {
        self.verdicts.last()
    }

    /// Returns the best score seen.
    #[must_use]
    pub fn best_score(&self) -> Option<f64> {
        self.verdicts.iter().map(|verdict| verdict.score).reduce(f64::max)
    }

    /// Returns the trace as JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result() -> IterationResult {
        IterationResult {
            success: false,
            final_plan: Some(json!({"v": 2})),
            termination_reason: IterationState::MaxIterationsReached,
            iterations: 2,
            tokens_used: 40,
            verdicts: vec![JudgeVerdict::soft_fail(4.0), JudgeVerdict::soft_fail(7.5)],
            revision_requests: Vec::new(),
            trace: vec![IterationRecord::new(0), IterationRecord::new(1)],
            transitions: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_accessors() {
        let result = result();
        assert_eq!(result.final_verdict().map(|v| v.score), Some(7.5));
        assert_eq!(result.best_score(), Some(7.5));
    }

    #[test]
    fn test_record_tokens() {
        let record = IterationRecord {
            planner_tokens: 30,
            judge_tokens: 12,
            ..IterationRecord::new(0)
        };
        assert_eq!(record.tokens_used(), 42);
    }

    #[test]
    fn test_serializes_terminal_reason() {
        let json = result().to_json();
        assert_eq!(json["termination_reason"], json!("MAX_ITERATIONS_REACHED"));
        assert_eq!(json["trace"].as_array().map(Vec::len), Some(2));
        assert!(json.get("error").is_none());
    }
}
