//! Collaborators driven by the iteration controller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of one planner or judge call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    /// Whether the call produced usable data.
    pub success: bool,
    /// The plan (planner) or verdict (judge).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Tokens consumed by the call.
    #[serde(default)]
    pub tokens_used: u64,
    /// Error message for failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Conversation state to hand back on the next call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl AgentRun {
    /// Creates a successful run.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    /// Creates a failed run.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            ..Self::default()
        }
    }

    /// Sets the token usage.
    #[must_use]
    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    /// Sets the conversation state.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Returns the error message, or a generic one.
    #[must_use]
    pub fn error_or(&self, fallback: &str) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// A planner or judge.
///
/// A conversational planner returns `state` and receives it back on its next
/// call. The judge is always called with `state = None`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name used in logs and events.
    fn name(&self) -> &str {
        "agent"
    }

    /// Runs the agent with the given variables.
    async fn run(&self, variables: &Map<String, Value>, state: Option<Value>) -> AgentRun;
}

/// Cheap local plan checks run before the judge.
pub trait PlanValidator: Send + Sync {
    /// Returns every problem found in `plan`. Empty means valid.
    fn validate(&self, plan: &Value) -> Vec<String>;
}

impl<F> PlanValidator for F
where
    F: Fn(&Value) -> Vec<String> + Send + Sync,
{
    fn validate(&self, plan: &Value) -> Vec<String> {
        self(plan)
    }
}

/// A validator that accepts every plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PlanValidator for AcceptAll {
    fn validate(&self, _plan: &Value) -> Vec<String> {
        Vec::new()
    }
}
