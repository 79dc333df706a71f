//! Context management for pipeline execution.
//!
//! This module provides:
//! - The per-run `PipelineContext` (cancellation, state, metrics, services)
//! - Thread-safe state and metrics bags

mod bags;
mod execution;

pub use bags::{MetricsBag, StateBag};
pub use execution::{PipelineContext, ServiceHandle};
