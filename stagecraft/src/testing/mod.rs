//! Testing utilities for stagecraft pipelines and iteration loops.
//!
//! This module provides:
//! - Mock, failing, flaky, slow and panicking stages
//! - A doubling stage for fan-out scenarios
//! - A scripted agent for driving the iteration controller

mod mocks;

pub use mocks::{
    DoublingStage, FailingStage, FlakyStage, MockStage, PanickingStage, ScriptedAgent, SlowStage,
};
