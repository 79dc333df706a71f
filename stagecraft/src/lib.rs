//! # Stagecraft
//!
//! A pipeline and iteration orchestration engine.
//!
//! Stagecraft provides two cooperating pieces:
//!
//! - **Stage DAG execution**: declare stages with dependencies, run them in
//!   waves with bounded retries, timeouts, fan-out and fail-fast control
//! - **Iteration control**: a bounded plan/validate/judge/revise loop driven
//!   by an explicit state machine, with structured revision feedback
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagecraft::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("etl")
//!     .stage("fetch", Arc::new(FetchStage), &[])
//!     .stage("process", Arc::new(ProcessStage), &["fetch"])
//!     .stage("store", Arc::new(StoreStage), &["process"])
//!     .build()?;
//!
//! let result = PipelineExecutor::new()
//!     .execute(&pipeline, json!({"source": "s3://bucket"}), Arc::new(PipelineContext::new()))
//!     .await;
//! assert!(result.success);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod iteration;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{MetricsBag, PipelineContext, StateBag};
    pub use crate::core::{ExecutionPattern, StageStatus};
    pub use crate::errors::{
        ConfigError, ContractErrorInfo, CycleDetectedError, PipelineValidationError,
        StagecraftError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::iteration::{
        Agent, AgentRun, IterationConfig, IterationController, IterationResult, IterationState,
        JudgeIssue, JudgeVerdict, PlanValidator, RevisionRequest, VerdictStatus,
    };
    pub use crate::observability::{init_tracing, TracingConfig};
    pub use crate::pipeline::{
        PipelineBuilder, PipelineDefinition, PipelineExecutor, PipelineResult, RetryConfig,
        StageDefinition,
    };
    pub use crate::stages::{AsyncFnStage, FnStage, NoOpStage, Stage, StageResult};
}
