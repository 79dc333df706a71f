//! Revision requests and the feedback handed back to the planner.

use super::{IterationConfig, JudgeVerdict, VerdictStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Write as _;

/// How urgently the next plan must change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionPriority {
    /// The judge hard-failed the plan.
    Critical,
    /// Soft fail with a low score.
    High,
    /// Soft fail with an acceptable score.
    Medium,
}

impl RevisionPriority {
    /// Derives the priority from a verdict.
    #[must_use]
    pub fn for_verdict(verdict: &JudgeVerdict, config: &IterationConfig) -> Self {
        match verdict.status {
            VerdictStatus::HardFail => Self::Critical,
            _ if verdict.score < config.high_priority_below => Self::High,
            _ => Self::Medium,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
        }
    }
}

/// Structured instructions for the next planning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRequest {
    /// Urgency.
    pub priority: RevisionPriority,
    /// Distinct issue categories, first-seen order.
    pub focus_areas: Vec<String>,
    /// Concrete fixes, validator errors first.
    pub specific_fixes: Vec<String>,
    /// Strengths to preserve, as `"keep: ..."`.
    pub avoid: Vec<String>,
    /// The judge's free-text feedback.
    pub context: String,
    /// Zero-based iteration that produced the verdict.
    pub iteration: u32,
    /// The verdict score.
    pub score: f64,
}

/// Builds the revision request for a failing verdict.
///
/// `pending_validation_errors` are validator errors recorded since the last
/// revision; they lead `specific_fixes` verbatim.
#[must_use]
pub fn build_revision_request(
    verdict: &JudgeVerdict,
    pending_validation_errors: &[String],
    iteration: u32,
    config: &IterationConfig,
) -> RevisionRequest {
    let mut focus_areas: Vec<String> = Vec::new();
    for issue in &verdict.issues {
        if !focus_areas.contains(&issue.category) {
            focus_areas.push(issue.category.clone());
        }
    }

    let specific_fixes = pending_validation_errors
        .iter()
        .cloned()
        .chain(verdict.issues.iter().filter_map(|issue| issue.fix().map(str::to_string)))
        .collect();

    let avoid = verdict
        .strengths
        .iter()
        .take(config.max_avoid_items)
        .map(|strength| format!("keep: {strength}"))
        .collect();

    RevisionRequest {
        priority: RevisionPriority::for_verdict(verdict, config),
        focus_areas,
        specific_fixes,
        avoid,
        context: verdict.feedback.clone(),
        iteration,
        score: verdict.score,
    }
}

/// One round of feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackRound {
    /// The validator rejected the plan.
    Validation {
        /// Zero-based iteration.
        iteration: u32,
        /// Validator errors, verbatim.
        errors: Vec<String>,
    },
    /// The judge asked for a revision.
    Revision(RevisionRequest),
}

impl FeedbackRound {
    fn iteration(&self) -> u32 {
        match self {
            Self::Validation { iteration, .. } => *iteration,
            Self::Revision(request) => request.iteration,
        }
    }
}

/// Feedback collected across iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAccumulator {
    window: usize,
    rounds: Vec<FeedbackRound>,
    pending_validation: Vec<String>,
}

impl FeedbackAccumulator {
    /// Creates an accumulator exposing the last `window` rounds.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            rounds: Vec::new(),
            pending_validation: Vec::new(),
        }
    }

    /// Records validator errors for `iteration`.
    pub fn record_validation_errors(&mut self, iteration: u32, errors: &[String]) {
        if errors.is_empty() {
            return;
        }
        self.pending_validation.extend(errors.iter().cloned());
        self.rounds.push(FeedbackRound::Validation {
            iteration,
            errors: errors.to_vec(),
        });
    }

    /// Returns validator errors not yet folded into a revision request.
    #[must_use]
    pub fn pending_validation_errors(&self) -> &[String] {
        &self.pending_validation
    }

    /// Records a revision request, clearing pending validator errors.
    pub fn record_revision(&mut self, request: RevisionRequest) {
        self.pending_validation.clear();
        self.rounds.push(FeedbackRound::Revision(request));
    }

    /// Returns every recorded round.
    #[must_use]
    pub fn rounds(&self) -> &[FeedbackRound] {
        &self.rounds
    }

    /// Returns the most recent rounds, oldest first.
    #[must_use]
    pub fn recent(&self) -> &[FeedbackRound] {
        let start = self.rounds.len().saturating_sub(self.window);
        &self.rounds[start..]
    }

    /// Returns the latest revision request.
    #[must_use]
    pub fn latest_revision(&self) -> Option<&RevisionRequest> {
        self.rounds.iter().rev().find_map(|round| match round {
            FeedbackRound::Revision(request) => Some(request),
            FeedbackRound::Validation { .. } => None,
        })
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Variables merged into the planner's input.
    ///
    /// `feedback` holds the recent rounds, `revision_request` the latest
    /// request and `feedback_text` the rendered digest.
    #[must_use]
    pub fn to_variables(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("feedback".to_string(), json!(self.recent()));
        vars.insert(
            "revision_request".to_string(),
            self.latest_revision().map_or(Value::Null, |request| json!(request)),
        );
        vars.insert("feedback_text".to_string(), Value::String(self.render()));
        vars
    }

    /// Renders the recent rounds as plain text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for round in self.recent() {
            if !out.is_empty() {
                out.push('\n');
            }
            let iteration = round.iteration() + 1;
            match round {
                FeedbackRound::Validation { errors, .. } => {
                    let _ = writeln!(out, "Iteration {iteration}: the plan failed validation.");
                    for error in errors {
                        let _ = writeln!(out, "- {error}");
                    }
                }
                FeedbackRound::Revision(request) => {
                    let _ = writeln!(
                        out,
                        "Iteration {iteration}: revision requested ({} priority, score {:.1}).",
                        request.priority.label(),
                        request.score
                    );
                    if !request.focus_areas.is_empty() {
                        let _ = writeln!(out, "Focus on: {}", request.focus_areas.join(", "));
                    }
                    if !request.specific_fixes.is_empty() {
                        out.push_str("Fix:\n");
                        for fix in &request.specific_fixes {
                            let _ = writeln!(out, "- {fix}");
                        }
                    }
                    if !request.avoid.is_empty() {
                        out.push_str("Preserve:\n");
                        for item in &request.avoid {
                            let _ = writeln!(out, "- {item}");
                        }
                    }
                    if !request.context.is_empty() {
                        let _ = writeln!(out, "Judge notes: {}", request.context);
                    }
                }
            }
        }
        out
    }
}
