//! The bounded plan/validate/judge/revise loop.

use super::feedback::build_revision_request;
use super::state::{IterationStateMachine, TransitionError};
use super::{
    Agent, FeedbackAccumulator, IterationConfig, IterationRecord, IterationResult, IterationState,
    JudgeVerdict, PlanValidator, RevisionRequest, VerdictStatus,
};
use crate::events::{EventSink, NoOpEventSink};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives a planner and a judge until a plan is approved or a bound is hit.
#[derive(Clone)]
pub struct IterationController {
    config: IterationConfig,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for IterationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// How the loop ended.
struct Termination {
    state: IterationState,
    error: Option<String>,
}

impl Termination {
    const fn new(state: IterationState) -> Self {
        Self { state, error: None }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            state: IterationState::Failed,
            error: Some(error.into()),
        }
    }
}

enum Step {
    Continue,
    Stop(Termination),
}

/// Mutable state of one run.
struct LoopRun {
    machine: IterationStateMachine,
    feedback: FeedbackAccumulator,
    trace: Vec<IterationRecord>,
    verdicts: Vec<JudgeVerdict>,
    revision_requests: Vec<RevisionRequest>,
    tokens_used: u64,
    last_plan: Option<Value>,
    planner_state: Option<Value>,
    iterations: u32,
}

impl IterationController {
    /// Creates a controller with a no-op event sink.
    #[must_use]
    pub fn new(config: IterationConfig) -> Self {
        Self {
            config,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &IterationConfig {
        &self.config
    }

    /// Runs the loop.
    ///
    /// Never fails: an invalid configuration, planner or judge failures and
    /// exhausted bounds all end in a terminal [`IterationResult`].
    pub async fn run(
        &self,
        planner: &dyn Agent,
        judge: &dyn Agent,
        initial_variables: &Map<String, Value>,
        validator: &dyn PlanValidator,
    ) -> IterationResult {
        let mut run = LoopRun {
            machine: IterationStateMachine::new(),
            feedback: FeedbackAccumulator::new(self.config.feedback_window),
            trace: Vec::new(),
            verdicts: Vec::new(),
            revision_requests: Vec::new(),
            tokens_used: 0,
            last_plan: None,
            planner_state: None,
            iterations: 0,
        };

        if let Err(err) = self.config.validate() {
            warn!(error = %err, "Refusing to iterate with invalid configuration");
            let termination = match run.machine.transition(IterationState::Failed, 0) {
                Ok(()) => Termination::failed(err.to_string()),
                Err(transition) => Termination::failed(transition.to_string()),
            };
            return self.finish(run, termination);
        }

        info!(
            planner = planner.name(),
            judge = judge.name(),
            max_iterations = self.config.max_iterations,
            token_budget = ?self.config.token_budget,
            "Iteration loop started"
        );

        for iteration in 0..self.config.max_iterations {
            run.iterations = iteration + 1;
            self.event_sink.try_emit(
                "iteration.started",
                Some(json!({ "iteration": iteration, "tokens_used": run.tokens_used })),
            );

            let mut record = IterationRecord::new(iteration);
            let step = self
                .iterate(&mut run, &mut record, planner, judge, initial_variables, validator)
                .await;
            record.state = run.machine.state();
            run.trace.push(record);

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Stop(termination)) => return self.finish(run, termination),
                Err(err) => {
                    warn!(error = %err, "Iteration state machine rejected a transition");
                    return self.finish(run, Termination::failed(err.to_string()));
                }
            }
        }

        // Every final iteration stops explicitly; this only guards the loop bound.
        self.finish(run, Termination::new(IterationState::MaxIterationsReached))
    }

    async fn iterate(
        &self,
        run: &mut LoopRun,
        record: &mut IterationRecord,
        planner: &dyn Agent,
        judge: &dyn Agent,
        initial_variables: &Map<String, Value>,
        validator: &dyn PlanValidator,
    ) -> Result<Step, TransitionError> {
        let iteration = record.iteration;
        let is_last = iteration + 1 >= self.config.max_iterations;

        // Plan
        run.machine.transition(IterationState::Planning, iteration)?;
        let mut variables = initial_variables.clone();
        if iteration > 0 {
            variables.extend(run.feedback.to_variables());
        }
        variables.insert("iteration".to_string(), json!(iteration));

        let planned = planner.run(&variables, run.planner_state.clone()).await;
        record.planner_tokens = planned.tokens_used;
        run.tokens_used += planned.tokens_used;
        if planned.state.is_some() {
            run.planner_state.clone_from(&planned.state);
        }

        let plan = match (planned.success, planned.data) {
            (true, Some(plan)) => plan,
            (true, None) => {
                run.machine.transition(IterationState::Failed, iteration)?;
                return Ok(Step::Stop(Termination::failed(format!(
                    "Planner '{}' returned no plan",
                    planner.name()
                ))));
            }
            (false, _) => {
                let error = planned
                    .error_message
                    .unwrap_or_else(|| "planner failed without an error message".to_string());
                warn!(iteration, error = %error, "Planner failed");
                run.machine.transition(IterationState::Failed, iteration)?;
                return Ok(Step::Stop(Termination::failed(format!(
                    "Planner '{}' failed: {error}",
                    planner.name()
                ))));
            }
        };
        run.last_plan = Some(plan.clone());
        record.plan = Some(plan.clone());

        // Validate
        run.machine.transition(IterationState::Validating, iteration)?;
        let errors = validator.validate(&plan);
        if !errors.is_empty() {
            debug!(iteration, errors = errors.len(), "Plan failed validation");
            run.machine.transition(IterationState::ValidationFailed, iteration)?;
            run.feedback.record_validation_errors(iteration, &errors);
            self.event_sink.try_emit(
                "iteration.validation_failed",
                Some(json!({ "iteration": iteration, "errors": &errors })),
            );
            record.validation_errors = errors;

            if is_last {
                run.machine.transition(IterationState::MaxIterationsReached, iteration)?;
                return Ok(Step::Stop(Termination::new(IterationState::MaxIterationsReached)));
            }
            if self.budget_exhausted(run.tokens_used) {
                run.machine.transition(IterationState::TokenBudgetExceeded, iteration)?;
                return Ok(Step::Stop(Termination::new(IterationState::TokenBudgetExceeded)));
            }
            return Ok(Step::Continue);
        }

        // Judge
        run.machine.transition(IterationState::Judging, iteration)?;
        let mut judge_variables = initial_variables.clone();
        judge_variables.insert("plan".to_string(), plan);
        judge_variables.insert("iteration".to_string(), json!(iteration));
        judge_variables.insert("feedback".to_string(), json!(run.feedback.recent()));
        judge_variables.insert("feedback_text".to_string(), Value::String(run.feedback.render()));

        let judged = judge.run(&judge_variables, None).await;
        record.judge_tokens = judged.tokens_used;
        run.tokens_used += judged.tokens_used;

        let verdict = match self.parse_verdict(judge.name(), judged.success, judged.data, judged.error_message) {
            Ok(verdict) => verdict,
            Err(error) => {
                warn!(iteration, error = %error, "Judge failed");
                run.machine.transition(IterationState::Failed, iteration)?;
                return Ok(Step::Stop(Termination::failed(error)));
            }
        };

        debug!(iteration, status = %verdict.status, score = verdict.score, "Plan judged");
        self.event_sink.try_emit(
            "iteration.judged",
            Some(json!({
                "iteration": iteration,
                "status": verdict.status,
                "score": verdict.score,
                "issues": verdict.issues.len(),
            })),
        );
        run.verdicts.push(verdict.clone());
        record.verdict = Some(verdict.clone());

        // Decide
        let judged_state = match verdict.status {
            VerdictStatus::Approve => {
                run.machine.transition(IterationState::JudgeApproved, iteration)?;
                run.machine.transition(IterationState::Complete, iteration)?;
                return Ok(Step::Stop(Termination::new(IterationState::Complete)));
            }
            VerdictStatus::SoftFail => IterationState::JudgeSoftFail,
            VerdictStatus::HardFail => IterationState::JudgeHardFail,
        };
        run.machine.transition(judged_state, iteration)?;

        let request = build_revision_request(
            &verdict,
            run.feedback.pending_validation_errors(),
            iteration,
            &self.config,
        );
        run.feedback.record_revision(request.clone());
        run.revision_requests.push(request.clone());
        record.revision_request = Some(request);

        if self.budget_exhausted(run.tokens_used) {
            run.machine.transition(IterationState::TokenBudgetExceeded, iteration)?;
            return Ok(Step::Stop(Termination::new(IterationState::TokenBudgetExceeded)));
        }
        if is_last {
            run.machine.transition(IterationState::MaxIterationsReached, iteration)?;
            return Ok(Step::Stop(Termination::new(IterationState::MaxIterationsReached)));
        }
        Ok(Step::Continue)
    }

    fn parse_verdict(
        &self,
        judge: &str,
        success: bool,
        data: Option<Value>,
        error_message: Option<String>,
    ) -> Result<JudgeVerdict, String> {
        if !success {
            return Err(format!(
                "Judge '{judge}' failed: {}",
                error_message.unwrap_or_else(|| "judge failed without an error message".to_string())
            ));
        }
        let data = data.ok_or_else(|| format!("Judge '{judge}' returned no verdict"))?;
        let verdict = JudgeVerdict::from_value(&data)
            .map_err(|err| format!("Judge '{judge}' returned an unparseable verdict: {err}"))?;
        if !self.config.score_in_range(verdict.score) {
            return Err(format!(
                "Judge '{judge}' returned score {} outside {}..={}",
                verdict.score, self.config.min_score, self.config.max_score
            ));
        }
        Ok(verdict)
    }

    fn budget_exhausted(&self, tokens_used: u64) -> bool {
        self.config
            .token_budget
            .is_some_and(|budget| tokens_used >= budget)
    }

    fn finish(&self, run: LoopRun, termination: Termination) -> IterationResult {
        let success = termination.state == IterationState::Complete;
        if success {
            info!(iterations = run.iterations, tokens_used = run.tokens_used, "Plan approved");
        } else {
            warn!(
                reason = %termination.state,
                iterations = run.iterations,
                tokens_used = run.tokens_used,
                error = ?termination.error,
                "Iteration loop ended without approval"
            );
        }
        self.event_sink.try_emit(
            "iteration.completed",
            Some(json!({
                "success": success,
                "termination_reason": termination.state,
                "iterations": run.iterations,
                "tokens_used": run.tokens_used,
                "error": &termination.error,
            })),
        );

        IterationResult {
            success,
            final_plan: run.last_plan,
            termination_reason: termination.state,
            iterations: run.iterations,
            tokens_used: run.tokens_used,
            verdicts: run.verdicts,
            revision_requests: run.revision_requests,
            trace: run.trace,
            transitions: run.machine.into_history(),
            error: termination.error,
        }
    }
}
