//! Core domain model types for stagecraft.
//!
//! This module contains the fundamental enums shared by the executor and the
//! stage result records:
//! - Stage status
//! - Stage execution pattern

mod status;

pub use status::{ExecutionPattern, StageStatus};
