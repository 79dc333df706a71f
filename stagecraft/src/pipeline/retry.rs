//! Retry policy with exponential backoff and optional jitter.

use crate::errors::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter strategy applied on top of the deterministic backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Per-stage retry configuration.
///
/// The delay after failed attempt `n` (1-based) is
/// `min(initial_delay_ms * backoff_multiplier^(n-1), max_delay_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// A failure is retryable only if its error contains one of these.
    /// Empty means every failure is retryable.
    pub retryable_error_substrings: Vec<String>,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            retryable_error_substrings: Vec::new(),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Restricts retries to errors containing one of `substrings`.
    #[must_use]
    pub fn with_retryable_errors(mut self, substrings: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.retryable_error_substrings = substrings.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::new("RetryConfig", "max_attempts", "must be >= 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::new(
                "RetryConfig",
                "backoff_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::new(
                "RetryConfig",
                "max_delay_ms",
                format!(
                    "must be >= initial_delay_ms ({} < {})",
                    self.max_delay_ms, self.initial_delay_ms
                ),
            ));
        }
        if self.retryable_error_substrings.iter().any(String::is_empty) {
            return Err(ConfigError::new(
                "RetryConfig",
                "retryable_error_substrings",
                "must not contain empty strings",
            ));
        }
        Ok(())
    }

    /// Returns the deterministic delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.round() as u64)
    }

    /// Returns the delay after failed attempt `attempt`, with jitter applied.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = u64::try_from(self.backoff_delay(attempt).as_millis()).unwrap_or(u64::MAX);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Returns true if a stage failure with this error message may be retried.
    #[must_use]
    pub fn is_retryable(&self, error: &str) -> bool {
        self.retryable_error_substrings.is_empty()
            || self
                .retryable_error_substrings
                .iter()
                .any(|needle| error.contains(needle.as_str()))
    }
}

/// How a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The stage returned a failed result.
    Stage(String),
    /// The attempt exceeded its timeout.
    Timeout(u64),
    /// The stage panicked instead of returning.
    Fault(String),
}

impl AttemptFailure {
    /// Returns the failure as an error message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Stage(error) => error.clone(),
            Self::Timeout(ms) => format!("timed out after {ms}ms"),
            Self::Fault(detail) => format!("unexpected fault: {detail}"),
        }
    }

    /// Timeouts and faults always retry; stage failures consult the policy.
    #[must_use]
    pub fn is_retryable(&self, config: &RetryConfig) -> bool {
        match self {
            Self::Stage(error) => config.is_retryable(error),
            Self::Timeout(_) | Self::Fault(_) => true,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts remain.
    GiveUp,
    /// The failure is not retryable.
    NotRetryable,
}

/// Decides what to do after attempt `attempt` (1-based) failed with `failure`.
#[must_use]
pub fn should_retry(config: &RetryConfig, attempt: u32, failure: &AttemptFailure) -> RetryDecision {
    if !failure.is_retryable(config) {
        return RetryDecision::NotRetryable;
    }
    if attempt >= config.max_attempts {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(config.delay_for_attempt(attempt))
}
