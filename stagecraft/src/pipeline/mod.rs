//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage and pipeline definitions
//! - Graph validation and wave planning
//! - The wave executor with retry, timeout, fan-out and cancellation
//! - A validating pipeline builder

mod builder;
mod dag;
mod executor;
mod fan_out;
mod result;
mod retry;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use dag::{plan_waves, validate, ExecutionPlan};
pub use executor::PipelineExecutor;
pub use result::{PipelineResult, StageCounts, VALIDATION_STAGE};
pub use retry::{should_retry, AttemptFailure, JitterStrategy, RetryConfig, RetryDecision};
pub use spec::{PipelineDefinition, StageCondition, StageDefinition};
