//! Error types for the stagecraft engine.
//!
//! Stage failures never surface as `Err`: they are folded into
//! [`StageResult`](crate::stages::StageResult) and
//! [`PipelineResult`](crate::pipeline::PipelineResult) records. The types here
//! cover what can go wrong *before* anything runs (malformed graphs, invalid
//! configuration) plus the ambient failures of setting up observability.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for stagecraft operations.
#[derive(Debug, Error)]
pub enum StagecraftError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A configuration value was out of range.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A cycle was detected in the pipeline.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// The global tracing subscriber could not be installed.
    #[error("Tracing setup failed: {0}")]
    Tracing(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Converts to a JSON object suitable for result metadata.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("stages".to_string(), serde_json::json!(self.stages));
        if let Some(ref info) = self.error_info {
            map.insert("code".to_string(), serde_json::json!(info.code));
            if let Some(ref hint) = info.fix_hint {
                map.insert("fix_hint".to_string(), serde_json::json!(hint));
            }
        }
        serde_json::Value::Object(map)
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {config}.{field}: {reason}")]
pub struct ConfigError {
    /// The configuration struct (e.g. "RetryConfig").
    pub config: &'static str,
    /// The offending field.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(config: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            config,
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_pipeline_validation_error_to_json() {
        let err = PipelineValidationError::new("Test error")
            .with_stages(vec!["stage1".to_string(), "stage2".to_string()])
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-EMPTY", "empty"));

        let json = err.to_json();
        assert_eq!(json["message"], "Test error");
        assert_eq!(json["code"], "CONTRACT-004-EMPTY");
        assert_eq!(json["stages"][1], "stage2");
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");

        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(validation.stages.len(), 3);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::new("RetryConfig", "max_attempts", "must be >= 1");
        assert_eq!(err.to_string(), "Invalid RetryConfig.max_attempts: must be >= 1");
    }
}
