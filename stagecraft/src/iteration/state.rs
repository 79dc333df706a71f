//! Iteration loop states and the transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// State of the plan/validate/judge/revise loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationState {
    /// Nothing has run yet.
    #[default]
    NotStarted,
    /// Waiting on the planner.
    Planning,
    /// Running the local validator.
    Validating,
    /// The validator rejected the plan.
    ValidationFailed,
    /// Waiting on the judge.
    Judging,
    /// The judge approved the plan.
    JudgeApproved,
    /// The judge asked for minor revisions.
    JudgeSoftFail,
    /// The judge rejected the plan.
    JudgeHardFail,
    /// Terminal: an approved plan was produced.
    Complete,
    /// Terminal: the iteration cap was reached.
    MaxIterationsReached,
    /// Terminal: the token budget was met or exceeded.
    TokenBudgetExceeded,
    /// Terminal: the planner or judge failed.
    Failed,
}

impl IterationState {
    /// Returns true for the four terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::MaxIterationsReached | Self::TokenBudgetExceeded | Self::Failed
        )
    }

    /// Returns true if the loop may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use IterationState::{
            Complete, Failed, JudgeApproved, JudgeHardFail, JudgeSoftFail, Judging,
            MaxIterationsReached, NotStarted, Planning, TokenBudgetExceeded, ValidationFailed,
            Validating,
        };

        matches!(
            (self, next),
            (NotStarted, Planning | Failed)
                | (Planning, Validating | Failed)
                | (Validating, ValidationFailed | Judging)
                | (ValidationFailed, Planning | MaxIterationsReached | TokenBudgetExceeded)
                | (Judging, JudgeApproved | JudgeSoftFail | JudgeHardFail | Failed)
                | (JudgeApproved, Complete)
                | (
                    JudgeSoftFail | JudgeHardFail,
                    Planning | MaxIterationsReached | TokenBudgetExceeded
                )
        )
    }

    /// Returns the state name as used in serialized traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Planning => "PLANNING",
            Self::Validating => "VALIDATING",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Judging => "JUDGING",
            Self::JudgeApproved => "JUDGE_APPROVED",
            Self::JudgeSoftFail => "JUDGE_SOFT_FAIL",
            Self::JudgeHardFail => "JUDGE_HARD_FAIL",
            Self::Complete => "COMPLETE",
            Self::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            Self::TokenBudgetExceeded => "TOKEN_BUDGET_EXCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State left.
    pub from: IterationState,
    /// State entered.
    pub to: IterationState,
    /// Zero-based iteration in which the change happened.
    pub iteration: u32,
}

/// Raised when a transition is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid iteration transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state.
    pub from: IterationState,
    /// Rejected target state.
    pub to: IterationState,
}

/// Tracks the current state and every transition taken.
#[derive(Debug, Clone, Default)]
pub struct IterationStateMachine {
    state: IterationState,
    history: Vec<StateTransition>,
}

impl IterationStateMachine {
    /// Creates a machine in `NotStarted`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> IterationState {
        self.state
    }

    /// Returns every transition taken so far.
    #[must_use]
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Moves to `next`, recording the change.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the move is not in the table. The
    /// state is left unchanged.
    pub fn transition(&mut self, next: IterationState, iteration: u32) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.history.push(StateTransition {
            from: self.state,
            to: next,
            iteration,
        });
        self.state = next;
        Ok(())
    }

    /// Consumes the machine, returning its history.
    #[must_use]
    pub fn into_history(self) -> Vec<StateTransition> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IterationState::*;

    const ALL: [IterationState; 12] = [
        NotStarted,
        Planning,
        Validating,
        ValidationFailed,
        Judging,
        JudgeApproved,
        JudgeSoftFail,
        JudgeHardFail,
        Complete,
        MaxIterationsReached,
        TokenBudgetExceeded,
        Failed,
    ];

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ALL.iter().copied().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Complete, MaxIterationsReached, TokenBudgetExceeded, Failed]);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().copied().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
            }
        }
    }

    #[test]
    fn test_every_non_terminal_state_has_an_exit() {
        for from in ALL.iter().copied().filter(|s| !s.is_terminal()) {
            assert!(ALL.iter().any(|to| from.can_transition_to(*to)), "{from} is a dead end");
        }
    }

    #[test]
    fn test_happy_path() {
        let mut machine = IterationStateMachine::new();
        for next in [Planning, Validating, Judging, JudgeApproved, Complete] {
            machine.transition(next, 0).unwrap();
        }

        assert_eq!(machine.state(), Complete);
        assert_eq!(machine.history().len(), 5);
        assert_eq!(machine.history()[0].from, NotStarted);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut machine = IterationStateMachine::new();
        machine.transition(Planning, 0).unwrap();

        let err = machine.transition(Judging, 0).unwrap_err();
        assert_eq!(err.to_string(), "Invalid iteration transition PLANNING -> JUDGING");
        assert_eq!(machine.state(), Planning);
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_value(TokenBudgetExceeded).unwrap(), "TOKEN_BUDGET_EXCEEDED");
        let parsed: IterationState = serde_json::from_value(serde_json::json!("JUDGE_SOFT_FAIL")).unwrap();
        assert_eq!(parsed, JudgeSoftFail);
    }
}
