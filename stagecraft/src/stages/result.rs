//! Per-stage outcome records.

use crate::core::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of one stage (or one attempt of a stage).
///
/// Stages build these with [`StageResult::ok`] / [`StageResult::fail`]; the
/// executor then stamps the stage name, attempt count and timing before the
/// record lands in a [`PipelineResult`](crate::pipeline::PipelineResult).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,
    /// Outcome status.
    pub status: StageStatus,
    /// Output value, for successful stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message, for failed stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Number of attempts made (0 for skipped or never-attempted stages).
    #[serde(default)]
    pub attempts: u32,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    fn with_status(status: StageStatus) -> Self {
        let now = Utc::now();
        Self {
            stage_name: String::new(),
            status,
            output: None,
            error: None,
            metadata: HashMap::new(),
            attempts: 0,
            started_at: now,
            ended_at: now,
        }
    }

    /// Creates a successful result carrying `output`.
    #[must_use]
    pub fn ok(output: Value) -> Self {
        let mut result = Self::with_status(StageStatus::Ok);
        result.output = Some(output);
        result
    }

    /// Creates a successful result with no output.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::with_status(StageStatus::Ok)
    }

    /// Creates a failed result.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        let mut result = Self::with_status(StageStatus::Fail);
        result.error = Some(error.into());
        result
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        let mut result = Self::with_status(StageStatus::Skip);
        result.metadata.insert("skipped".to_string(), Value::Bool(true));
        result
            .metadata
            .insert("skip_reason".to_string(), Value::String(reason.into()));
        result
    }

    /// Creates a result for a stage that was never attempted.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        let mut result = Self::with_status(StageStatus::Cancel);
        result.error = Some(reason.into());
        result
    }

    /// Sets the stage name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.stage_name = name.into();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the attempt count, mirroring it into metadata.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self.metadata
            .insert("attempts".to_string(), Value::from(attempts));
        self
    }

    /// Sets the start and end timestamps.
    #[must_use]
    pub fn with_timing(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.ended_at = ended_at;
        self
    }

    /// Returns true for `Ok` and `Skip`.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.status == StageStatus::Skip
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }
}
