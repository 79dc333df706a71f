//! Stage status and execution pattern enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the executor invokes a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPattern {
    /// Invoke the stage once with its resolved input, under the retry policy.
    #[default]
    Sequential,
    /// Invoke the stage once per element of a list-shaped input.
    FanOut,
    /// Evaluate the stage condition at execution time; run only if it holds.
    Conditional,
}

impl fmt::Display for ExecutionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::FanOut => write!(f, "fan_out"),
            Self::Conditional => write!(f, "conditional"),
        }
    }
}

/// The outcome status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Ok,
    /// Stage condition was false; not a failure.
    Skip,
    /// Stage failed after exhausting its attempts.
    Fail,
    /// Stage was never attempted (cancellation or fail-fast abort).
    Cancel,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skip => write!(f, "skip"),
            Self::Fail => write!(f, "fail"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skip)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail | Self::Cancel)
    }
}
