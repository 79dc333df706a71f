//! Stage trait and implementations.
//!
//! Stages are the units of work a pipeline schedules. The engine never looks
//! inside one: it resolves an input, calls [`Stage::execute`], and records
//! the returned [`StageResult`].

mod result;

pub use result::StageResult;

use crate::context::PipelineContext;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;

/// Trait for pipeline stages.
///
/// Expected failures are reported by returning [`StageResult::fail`]. A
/// panic inside `execute` is caught by the executor and treated as a
/// retryable fault, but it is not a substitute for returning a failure.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `input` - The resolved input: the pipeline input, a single upstream
    ///   output, a map of upstream outputs, or one fan-out element
    /// * `ctx` - The pipeline context shared by every stage of the run
    async fn execute(&self, input: Value, ctx: &PipelineContext) -> StageResult;
}

/// A simple function-based stage.
///
/// The closure returns an [`anyhow::Result`]; an `Err` becomes a failed
/// result carrying the full error chain.
pub struct FnStage<F>
where
    F: Fn(Value, &PipelineContext) -> anyhow::Result<Value> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(Value, &PipelineContext) -> anyhow::Result<Value> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(Value, &PipelineContext) -> anyhow::Result<Value> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(Value, &PipelineContext) -> anyhow::Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, ctx: &PipelineContext) -> StageResult {
        match (self.func)(input, ctx) {
            Ok(output) => StageResult::ok(output),
            Err(err) => StageResult::fail(format!("{err:#}")),
        }
    }
}

/// An async function-based stage.
///
/// Useful for wrapping calls to external services that already return a
/// future; the closure only sees the resolved input.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    name: String,
    func: F,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, _ctx: &PipelineContext) -> StageResult {
        (self.func)(input).await
    }
}

/// A stage that passes its input through unchanged.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, _ctx: &PipelineContext) -> StageResult {
        StageResult::ok(input)
    }
}
