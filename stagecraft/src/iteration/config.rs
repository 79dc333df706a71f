//! Iteration loop configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// Bounds and feedback policy for an [`IterationController`](super::IterationController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    /// Maximum number of plan/judge rounds.
    pub max_iterations: u32,
    /// Stop once planner + judge token usage meets this total.
    pub token_budget: Option<u64>,
    /// How many recent feedback rounds are handed back to the planner.
    pub feedback_window: usize,
    /// Soft-fail scores below this produce a `High` priority revision.
    pub high_priority_below: f64,
    /// Maximum verdict strengths carried into `avoid`.
    pub max_avoid_items: usize,
    /// Lowest score a judge may report.
    pub min_score: f64,
    /// Highest score a judge may report.
    pub max_score: f64,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            token_budget: None,
            feedback_window: 3,
            high_priority_below: 6.0,
            max_avoid_items: 3,
            min_score: 0.0,
            max_score: 10.0,
        }
    }
}

impl IterationConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the token budget.
    #[must_use]
    pub fn with_token_budget(mut self, budget: u64) -> Self {
        self.token_budget = Some(budget);
        self
    }

    /// Sets the feedback window.
    #[must_use]
    pub fn with_feedback_window(mut self, window: usize) -> Self {
        self.feedback_window = window;
        self
    }

    /// Sets the high-priority score threshold.
    #[must_use]
    pub fn with_high_priority_below(mut self, threshold: f64) -> Self {
        self.high_priority_below = threshold;
        self
    }

    /// Sets the maximum number of `avoid` items.
    #[must_use]
    pub fn with_max_avoid_items(mut self, items: usize) -> Self {
        self.max_avoid_items = items;
        self
    }

    /// Returns true if `score` is inside the configured scale.
    #[must_use]
    pub fn score_in_range(&self, score: f64) -> bool {
        score.is_finite() && (self.min_score..=self.max_score).contains(&score)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations < 1 {
            return Err(ConfigError::new("IterationConfig", "max_iterations", "must be >= 1"));
        }
        if self.token_budget == Some(0) {
            return Err(ConfigError::new("IterationConfig", "token_budget", "must be > 0 when set"));
        }
        if self.feedback_window < 1 {
            return Err(ConfigError::new("IterationConfig", "feedback_window", "must be >= 1"));
        }
        if !self.min_score.is_finite() || !self.max_score.is_finite() || self.min_score >= self.max_score {
            return Err(ConfigError::new(
                "IterationConfig",
                "max_score",
                format!(
                    "score scale must be finite with min < max, got {}..={}",
                    self.min_score, self.max_score
                ),
            ));
        }
        if !self.score_in_range(self.high_priority_below) {
            return Err(ConfigError::new(
                "IterationConfig",
                "high_priority_below",
                format!(
                    "must lie within {}..={}, got {}",
                    self.min_score, self.max_score, self.high_priority_below
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IterationConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert!(config.token_budget.is_none());
        assert_eq!(config.feedback_window, 3);
        assert!((config.high_priority_below - 6.0).abs() < f64::EPSILON);
        assert_eq!(config.max_avoid_items, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = IterationConfig::new().with_max_iterations(0).validate().unwrap_err();
        assert_eq!(err.field, "max_iterations");

        let err = IterationConfig::new().with_token_budget(0).validate().unwrap_err();
        assert_eq!(err.field, "token_budget");

        let err = IterationConfig::new().with_feedback_window(0).validate().unwrap_err();
        assert_eq!(err.field, "feedback_window");

        let err = IterationConfig::new()
            .with_high_priority_below(11.0)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "high_priority_below");
        assert!(err.to_string().starts_with("Invalid IterationConfig.high_priority_below"));
    }

    #[test]
    fn test_loads_partial_json() {
        let config: IterationConfig =
            serde_json::from_str(r#"{"max_iterations": 5, "token_budget": 20000}"#).unwrap();

        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.token_budget, Some(20_000));
        assert_eq!(config.feedback_window, 3);
    }

    #[test]
    fn test_score_in_range() {
        let config = IterationConfig::default();
        assert!(config.score_in_range(0.0));
        assert!(config.score_in_range(10.0));
        assert!(!config.score_in_range(10.5));
        assert!(!config.score_in_range(f64::NAN));
    }
}
