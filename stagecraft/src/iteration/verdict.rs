//! Judge verdicts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The judge's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    /// Accept the plan as-is.
    #[serde(alias = "approve")]
    Approve,
    /// Revise the plan; the core is sound.
    #[serde(alias = "soft_fail")]
    SoftFail,
    /// Revise the plan; the core is wrong.
    #[serde(alias = "hard_fail")]
    HardFail,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::SoftFail => write!(f, "SOFT_FAIL"),
            Self::HardFail => write!(f, "HARD_FAIL"),
        }
    }
}

/// A concrete edit the judge asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetedAction {
    /// What to change.
    pub description: String,
    /// Where to change it (section, time range, element id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// One problem reported by the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeIssue {
    /// Issue category, used for `focus_areas`.
    pub category: String,
    /// Free-form severity label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// What is wrong.
    #[serde(default)]
    pub description: String,
    /// Free-text suggestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Structured suggestion. Takes precedence over `fix_hint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeted_action: Option<TargetedAction>,
}

impl JudgeIssue {
    /// Creates an issue.
    #[must_use]
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            severity: None,
            description: description.into(),
            fix_hint: None,
            targeted_action: None,
        }
    }

    /// Sets the severity label.
    #[must_use]
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    /// Sets the free-text fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Sets the structured targeted action.
    #[must_use]
    pub fn with_targeted_action(mut self, description: impl Into<String>, target: Option<String>) -> Self {
        self.targeted_action = Some(TargetedAction {
            description: description.into(),
            target,
        });
        self
    }

    /// The fix to hand back to the planner, if any.
    #[must_use]
    pub fn fix(&self) -> Option<&str> {
        self.targeted_action
            .as_ref()
            .map(|action| action.description.as_str())
            .or(self.fix_hint.as_deref())
    }
}

/// Structured output of the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// The decision.
    pub status: VerdictStatus,
    /// Quality score on the configured scale.
    pub score: f64,
    /// Reported problems.
    #[serde(default)]
    pub issues: Vec<JudgeIssue>,
    /// Things the plan already does well.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Free-text summary.
    #[serde(default)]
    pub feedback: String,
}

impl JudgeVerdict {
    /// Creates a verdict with no issues or strengths.
    #[must_use]
    pub fn new(status: VerdictStatus, score: f64) -> Self {
        Self {
            status,
            score,
            issues: Vec::new(),
            strengths: Vec::new(),
            feedback: String::new(),
        }
    }

    /// Creates an approving verdict.
    #[must_use]
    pub fn approve(score: f64) -> Self {
        Self::new(VerdictStatus::Approve, score)
    }

    /// Creates a soft-fail verdict.
    #[must_use]
    pub fn soft_fail(score: f64) -> Self {
        Self::new(VerdictStatus::SoftFail, score)
    }

    /// Creates a hard-fail verdict.
    #[must_use]
    pub fn hard_fail(score: f64) -> Self {
        Self::new(VerdictStatus::HardFail, score)
    }

    /// Adds an issue.
    #[must_use]
    pub fn with_issue(mut self, issue: JudgeIssue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Adds a strength.
    #[must_use]
    pub fn with_strength(mut self, strength: impl Into<String>) -> Self {
        self.strengths.push(strength.into());
        self
    }

    /// Sets the free-text feedback.
    #[must_use]
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    /// Returns true for `Approve`.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == VerdictStatus::Approve
    }

    /// Parses a verdict out of judge output.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if `data` is not a verdict.
    pub fn from_value(data: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(data)
    }

    /// Serializes the verdict for a judge response.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
