//! Fan-out execution: one stage invoked once per element of a list input.
//!
//! Elements are not wrapped in retry or timeout; only whole-stage success or
//! failure is tracked.

use super::executor::{await_stage_call, spawn_stage_call};
use super::StageDefinition;
use crate::context::PipelineContext;
use crate::stages::StageResult;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Runs `def` once per element of `input` and gathers the outputs in input order.
///
/// A non-critical stage with failing elements succeeds with only the
/// successful outputs plus `fan_out_failed` metadata. A critical stage fails
/// with every element error folded into one message.
pub(crate) async fn run_fan_out(
    def: &StageDefinition,
    input: Value,
    ctx: &Arc<PipelineContext>,
) -> StageResult {
    let Value::Array(items) = input else {
        return StageResult::fail(format!(
            "Fan-out stage '{}' expects a sequence input, got {}",
            def.id,
            value_kind(&input)
        ))
        .with_attempts(1);
    };

    let total = items.len();
    let limit = def.max_concurrent_fan_out.unwrap_or(total).max(1);
    debug!(stage = %def.id, elements = total, limit, "Fanning out");

    let outcomes: Vec<Result<Value, String>> = stream::iter(items)
        .map(|item| {
            let handle = spawn_stage_call(Arc::clone(&def.stage), item, Arc::clone(ctx));
            async move {
                match await_stage_call(handle, None).await {
                    Ok(result) => Ok(result.output.unwrap_or(Value::Null)),
                    Err(failed) => Err(failed.failure.message()),
                }
            }
        })
        .buffered(limit)
        .collect()
        .await;

    let mut outputs = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => outputs.push(value),
            Err(error) => errors.push(format!("[{index}] {error}")),
        }
    }

    if errors.is_empty() {
        return StageResult::ok(Value::Array(outputs))
            .with_metadata("fan_out_total", json!(total))
            .with_attempts(1);
    }

    let failed = errors.len();
    if def.critical {
        return StageResult::fail(format!(
            "Fan-out stage '{}' failed for {failed} of {total} elements: {}",
            def.id,
            errors.join("; ")
        ))
        .with_metadata("fan_out_failed", json!(failed))
        .with_metadata("fan_out_total", json!(total))
        .with_metadata("fan_out_errors", json!(errors))
        .with_attempts(1);
    }

    debug!(stage = %def.id, failed, total, "Fan-out finished with partial success");
    StageResult::ok(Value::Array(outputs))
        .with_metadata("fan_out_failed", json!(failed))
        .with_metadata("fan_out_total", json!(total))
        .with_metadata("fan_out_errors", json!(errors))
        .with_attempts(1)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a map",
    }
}
