//! Wave-by-wave pipeline execution.
//!
//! The executor plans the graph, then runs each wave's stages concurrently.
//! Every stage attempt runs in its own task so a panicking stage becomes a
//! failed attempt instead of tearing down the run.

use super::dag::plan_waves;
use super::fan_out::run_fan_out;
use super::retry::{should_retry, AttemptFailure, RetryDecision};
use super::{PipelineDefinition, PipelineResult, StageDefinition};
use crate::context::PipelineContext;
use crate::core::{ExecutionPattern, StageStatus};
use crate::stages::{Stage, StageResult};
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Runs [`PipelineDefinition`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Executes `pipeline` against `initial_input`.
    ///
    /// Never fails: graph errors, stage failures, cancellation and fail-fast
    /// aborts are all reported through the returned [`PipelineResult`].
    pub async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        initial_input: Value,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult {
        let start = Instant::now();

        let plan = match plan_waves(pipeline) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(pipeline = %pipeline.name, error = %err, "Pipeline failed validation");
                ctx.try_emit_event(
                    "pipeline.validation_failed",
                    Some(json!({
                        "pipeline": &pipeline.name,
                        "error": err.to_json(),
                    })),
                );
                return PipelineResult::validation_failure(&pipeline.name, &err, elapsed_ms(start));
            }
        };

        info!(
            pipeline = %pipeline.name,
            run_id = %ctx.run_id(),
            stages = plan.stage_count(),
            waves = plan.len(),
            "Pipeline started"
        );
        ctx.try_emit_event(
            "pipeline.started",
            Some(json!({
                "pipeline": &pipeline.name,
                "run_id": ctx.run_id().to_string(),
                "waves": &plan.waves,
            })),
        );

        let mut run = RunRecord::new(pipeline, &plan.waves, ctx.run_id().to_string());
        let by_id: HashMap<&str, &StageDefinition> = pipeline
            .stages
            .iter()
            .map(|stage| (stage.id.as_str(), stage))
            .collect();

        for (wave_index, wave) in plan.waves.iter().enumerate() {
            if ctx.is_cancelled() {
                let reason = ctx
                    .cancel_reason()
                    .unwrap_or_else(|| "Pipeline cancelled".to_string());
                warn!(pipeline = %pipeline.name, wave = wave_index, reason = %reason, "Pipeline cancelled");

                run.mark_not_attempted(&plan.waves[wave_index..], &format!("not attempted: {reason}"));
                run.metadata.insert("cancelled".to_string(), json!(true));
                run.metadata.insert("cancel_reason".to_string(), json!(reason));
                ctx.try_emit_event(
                    "pipeline.cancelled",
                    Some(json!({
                        "pipeline": &pipeline.name,
                        "reason": &reason,
                        "wave": wave_index,
                    })),
                );
                return run.finish(&ctx, start, false);
            }

            debug!(pipeline = %pipeline.name, wave = wave_index, stages = ?wave, "Running wave");

            let definitions: Vec<&StageDefinition> = wave
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            let results = join_all(definitions.iter().map(|def| {
                let input = resolve_input(def, &initial_input, &run.outputs);
                run_stage(def, input, &ctx)
            }))
            .await;

            let mut aborted_by: Option<&str> = None;
            for (def, result) in definitions.iter().zip(results) {
                let failed = result.status.is_failure();
                run.record(&def.id, result);
                if failed && def.critical && pipeline.fail_fast && aborted_by.is_none() {
                    aborted_by = Some(def.id.as_str());
                }
            }

            if let Some(stage_id) = aborted_by {
                warn!(pipeline = %pipeline.name, stage = %stage_id, "Critical stage failed, aborting run");
                run.mark_not_attempted(
                    &plan.waves[wave_index + 1..],
                    &format!("not attempted: critical stage '{stage_id}' failed"),
                );
                run.metadata.insert("aborted_by".to_string(), json!(stage_id));
                return run.finish(&ctx, start, true);
            }
        }

        run.finish(&ctx, start, false)
    }
}

/// Accumulates per-stage outcomes while the run progresses.
struct RunRecord {
    pipeline: String,
    outputs: HashMap<String, Value>,
    stage_results: HashMap<String, StageResult>,
    failed_stages: Vec<String>,
    metadata: HashMap<String, Value>,
}

impl RunRecord {
    fn new(pipeline: &PipelineDefinition, waves: &[Vec<String>], run_id: String) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("pipeline".to_string(), json!(pipeline.name));
        metadata.insert("run_id".to_string(), json!(run_id));
        metadata.insert("waves".to_string(), json!(waves));
        metadata.insert("fail_fast".to_string(), json!(pipeline.fail_fast));

        Self {
            pipeline: pipeline.name.clone(),
            outputs: HashMap::new(),
            stage_results: HashMap::new(),
            failed_stages: Vec::new(),
            metadata,
        }
    }

    fn record(&mut self, id: &str, result: StageResult) {
        if result.status == StageStatus::Ok {
            if let Some(output) = &result.output {
                self.outputs.insert(id.to_string(), output.clone());
            }
        }
        if result.status.is_failure() {
            self.failed_stages.push(id.to_string());
        }
        self.stage_results.insert(id.to_string(), result);
    }

    fn mark_not_attempted(&mut self, waves: &[Vec<String>], reason: &str) {
        for id in waves.iter().flatten() {
            self.record(id, StageResult::cancelled(reason).named(id.as_str()));
        }
    }

    fn finish(mut self, ctx: &PipelineContext, start: Instant, aborted: bool) -> PipelineResult {
        let cancelled = self
            .metadata
            .get("cancelled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let success = self.failed_stages.is_empty() && !aborted && !cancelled;
        let total_duration_ms = elapsed_ms(start);

        if !cancelled {
            self.metadata.insert("cancelled".to_string(), json!(false));
        }
        // A cancel raised during the final wave is only observable here.
        let cancel_requested = ctx.is_cancelled();
        self.metadata
            .insert("cancel_requested".to_string(), json!(cancel_requested));
        if cancel_requested && !cancelled {
            self.metadata
                .insert("cancel_reason".to_string(), json!(ctx.cancel_reason()));
        }

        if success {
            info!(pipeline = %self.pipeline, duration_ms = total_duration_ms, "Pipeline completed");
            ctx.try_emit_event(
                "pipeline.completed",
                Some(json!({
                    "pipeline": &self.pipeline,
                    "duration_ms": total_duration_ms,
                })),
            );
        } else if !cancelled {
            warn!(
                pipeline = %self.pipeline,
                failed_stages = ?self.failed_stages,
                duration_ms = total_duration_ms,
                "Pipeline failed"
            );
            ctx.try_emit_event(
                "pipeline.failed",
                Some(json!({
                    "pipeline": &self.pipeline,
                    "failed_stages": &self.failed_stages,
                    "aborted_by": self.metadata.get("aborted_by"),
                    "duration_ms": total_duration_ms,
                })),
            );
        }

        PipelineResult {
            success,
            outputs: self.outputs,
            stage_results: self.stage_results,
            failed_stages: self.failed_stages,
            total_duration_ms,
            metadata: self.metadata,
        }
    }
}

/// Zero inputs take the initial input, one input passes through verbatim and
/// several are keyed by upstream id. A missing upstream output is `null`.
fn resolve_input(def: &StageDefinition, initial_input: &Value, outputs: &HashMap<String, Value>) -> Value {
    match def.inputs.as_slice() {
        [] => initial_input.clone(),
        [single] => outputs.get(single).cloned().unwrap_or(Value::Null),
        many => {
            let map: Map<String, Value> = many
                .iter()
                .map(|id| (id.clone(), outputs.get(id).cloned().unwrap_or(Value::Null)))
                .collect();
            Value::Object(map)
        }
    }
}

async fn run_stage(def: &StageDefinition, input: Value, ctx: &Arc<PipelineContext>) -> StageResult {
    let started_at = Utc::now();
    let clock = Instant::now();

    if def.pattern == ExecutionPattern::Conditional {
        if let Some(condition) = &def.condition {
            match catch_unwind(AssertUnwindSafe(|| condition(ctx.as_ref()))) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(stage = %def.id, "Condition false, skipping stage");
                    ctx.try_emit_event(
                        "stage.skipped",
                        Some(json!({ "stage": &def.id, "reason": "condition not met" })),
                    );
                    return StageResult::skip("condition not met")
                        .named(def.stage.name())
                        .with_timing(started_at, Utc::now());
                }
                Err(payload) => {
                    let message = format!("condition panicked: {}", panic_payload_message(payload.as_ref()));
                    warn!(stage = %def.id, error = %message, "Stage condition faulted");
                    ctx.try_emit_event(
                        "stage.failed",
                        Some(json!({ "stage": &def.id, "error": &message, "attempts": 0 })),
                    );
                    return StageResult::fail(message)
                        .named(def.stage.name())
                        .with_timing(started_at, Utc::now());
                }
            }
        }
    }

    ctx.try_emit_event(
        "stage.started",
        Some(json!({ "stage": &def.id, "pattern": def.pattern.to_string() })),
    );

    let result = match def.pattern {
        ExecutionPattern::FanOut => run_fan_out(def, input, ctx).await,
        ExecutionPattern::Sequential | ExecutionPattern::Conditional => run_with_retry(def, input, ctx).await,
    };

    let duration_ms = elapsed_ms(clock);
    ctx.add_metric(format!("{}.duration_ms", def.id), json!(duration_ms));
    ctx.add_metric(format!("{}.attempts", def.id), json!(result.attempts));

    let result = result
        .named(def.stage.name())
        .with_timing(started_at, Utc::now());

    if result.success() {
        debug!(stage = %def.id, attempts = result.attempts, duration_ms, "Stage completed");
        ctx.try_emit_event(
            "stage.completed",
            Some(json!({
                "stage": &def.id,
                "attempts": result.attempts,
                "duration_ms": duration_ms,
            })),
        );
    } else {
        warn!(stage = %def.id, attempts = result.attempts, error = ?result.error, "Stage failed");
        ctx.try_emit_event(
            "stage.failed",
            Some(json!({
                "stage": &def.id,
                "attempts": result.attempts,
                "error": &result.error,
                "duration_ms": duration_ms,
            })),
        );
    }

    result
}

async fn run_with_retry(def: &StageDefinition, input: Value, ctx: &Arc<PipelineContext>) -> StageResult {
    let timeout = def.timeout_ms.map(Duration::from_millis);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(stage = %def.id, attempt, "Running stage attempt");

        let handle = spawn_stage_call(Arc::clone(&def.stage), input.clone(), Arc::clone(ctx));
        let failed = match await_stage_call(handle, timeout).await {
            Ok(result) => return result.with_attempts(attempt),
            Err(failed) => failed,
        };
        let failure = &failed.failure;

        match should_retry(&def.retry_config, attempt, failure) {
            RetryDecision::Retry(delay) => {
                debug!(
                    stage = %def.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.message(),
                    "Retrying stage"
                );
                ctx.try_emit_event(
                    "stage.retrying",
                    Some(json!({
                        "stage": &def.id,
                        "attempt": attempt,
                        "delay_ms": delay.as_millis() as u64,
                        "error": failure.message(),
                    })),
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => {
                return exhausted(
                    format!(
                        "Stage '{}' failed after {attempt} attempt(s): {}",
                        def.id,
                        failure.message()
                    ),
                    failed,
                    attempt,
                    true,
                );
            }
            RetryDecision::NotRetryable => {
                return exhausted(
                    format!(
                        "Stage '{}' failed with a non-retryable error after {attempt} attempt(s): {}",
                        def.id,
                        failure.message()
                    ),
                    failed,
                    attempt,
                    false,
                );
            }
        }
    }
}

/// Builds the final failed result, keeping whatever metadata the last attempt reported.
fn exhausted(message: String, failed: FailedAttempt, attempts: u32, retryable: bool) -> StageResult {
    let failure = failed.failure;
    let mut result = StageResult::fail(message);
    result.metadata.extend(failed.metadata);
    result
        .with_metadata("last_error", json!(failure.message()))
        .with_metadata("timed_out", json!(matches!(failure, AttemptFailure::Timeout(_))))
        .with_metadata("retryable", json!(retryable))
        .with_attempts(attempts)
}

/// Spawns one invocation of `stage` on its own task.
pub(super) fn spawn_stage_call(
    stage: Arc<dyn Stage>,
    input: Value,
    ctx: Arc<PipelineContext>,
) -> JoinHandle<StageResult> {
    tokio::spawn(async move { stage.execute(input, &ctx).await })
}

/// A failed attempt plus the metadata the stage attached to it, if it returned at all.
pub(super) struct FailedAttempt {
    pub(super) failure: AttemptFailure,
    pub(super) metadata: HashMap<String, Value>,
}

impl From<AttemptFailure> for FailedAttempt {
    fn from(failure: AttemptFailure) -> Self {
        Self {
            failure,
            metadata: HashMap::new(),
        }
    }
}

/// Awaits a spawned invocation, classifying failures.
///
/// The task is aborted when `timeout` elapses.
pub(super) async fn await_stage_call(
    mut handle: JoinHandle<StageResult>,
    timeout: Option<Duration>,
) -> Result<StageResult, FailedAttempt> {
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(AttemptFailure::Timeout(limit.as_millis() as u64).into());
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) if result.status.is_failure() => Err(FailedAttempt {
            failure: AttemptFailure::Stage(
                result
                    .error
                    .unwrap_or_else(|| "stage failed without an error message".to_string()),
            ),
            metadata: result.metadata,
        }),
        Ok(result) => Ok(result),
        Err(err) => Err(AttemptFailure::Fault(join_error_message(err)).into()),
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        panic_payload_message(payload.as_ref())
    } else {
        "stage task was cancelled".to_string()
    }
}

fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "stage panicked".to_string()
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
