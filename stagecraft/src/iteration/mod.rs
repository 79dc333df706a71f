//! Bounded plan/validate/judge/revise loops.
//!
//! An [`IterationController`] asks a planner for a plan, checks it with a
//! cheap local [`PlanValidator`], asks a judge for a [`JudgeVerdict`] and
//! folds the verdict into a [`RevisionRequest`] for the next round. The loop
//! always ends in one of four terminal [`IterationState`]s and returns the
//! best plan it has.

mod config;
mod controller;
mod feedback;
mod ports;
mod result;
mod state;
mod verdict;

pub use config::IterationConfig;
pub use controller::IterationController;
pub use feedback::{
    build_revision_request, FeedbackAccumulator, FeedbackRound, RevisionPriority, RevisionRequest,
};
pub use ports::{AcceptAll, Agent, AgentRun, PlanValidator};
pub use result::{IterationRecord, IterationResult};
pub use state::{IterationState, IterationStateMachine, StateTransition, TransitionError};
pub use verdict::{JudgeIssue, JudgeVerdict, TargetedAction, VerdictStatus};
