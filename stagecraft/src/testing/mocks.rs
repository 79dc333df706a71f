//! Test doubles for stages and agents.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Duration;

use crate::context::PipelineContext;
use crate::iteration::{Agent, AgentRun};
use crate::stages::{Stage, StageResult};

/// A mock stage that records calls and returns a configurable result.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    output: Mutex<StageResult>,
    inputs: Mutex<Vec<Value>>,
}

impl MockStage {
    /// Creates a mock stage that succeeds with `null`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::returning(name, StageResult::ok(Value::Null))
    }

    /// Creates a mock stage that returns `result` on every call.
    #[must_use]
    pub fn returning(name: impl Into<String>, result: StageResult) -> Self {
        Self {
            name: name.into(),
            output: Mutex::new(result),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Sets the result to return.
    pub fn set_output(&self, result: StageResult) {
        *self.output.lock() = result;
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the input of each call.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.inputs.lock().clear();
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, _ctx: &PipelineContext) -> StageResult {
        self.inputs.lock().push(input);
        self.output.lock().clone()
    }
}

/// A stage that always fails with the same error.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    calls: Mutex<usize>,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of attempts made against this stage.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value, _ctx: &PipelineContext) -> StageResult {
        *self.calls.lock() += 1;
        StageResult::fail(self.error.clone())
    }
}

/// A stage that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    name: String,
    failures: usize,
    output: Value,
    calls: Mutex<usize>,
}

impl FlakyStage {
    /// Fails the first `failures` calls, then returns `output`.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize, output: Value) -> Self {
        Self {
            name: name.into(),
            failures,
            output,
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of attempts made against this stage.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for FlakyStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value, _ctx: &PipelineContext) -> StageResult {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if call <= self.failures {
            StageResult::fail(format!("transient failure #{call}"))
        } else {
            StageResult::ok(self.output.clone())
        }
    }
}

/// A stage that sleeps before returning.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    output: Value,
    calls: Mutex<usize>,
}

impl SlowStage {
    /// Creates a slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration, output: Value) -> Self {
        Self {
            name: name.into(),
            delay,
            output,
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of attempts started against this stage.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: Value, _ctx: &PipelineContext) -> StageResult {
        *self.calls.lock() += 1;
        tokio::time::sleep(self.delay).await;
        StageResult::ok(self.output.clone())
    }
}

/// A stage that panics instead of returning.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
    message: String,
    calls: Mutex<usize>,
}

impl PanickingStage {
    /// Creates a stage that panics with `message`.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of attempts made against this stage.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn execute(&self, _input: Value, _ctx: &PipelineContext) -> StageResult {
        *self.calls.lock() += 1;
        panic!("{}", self.message);
    }
}

/// Doubles numeric input. Configured values fail instead.
#[derive(Debug)]
pub struct DoublingStage {
    name: String,
    fail_on: Vec<Value>,
}

impl DoublingStage {
    /// Creates a doubling stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_on: Vec::new(),
        }
    }

    /// Fails whenever the input equals `value`.
    #[must_use]
    pub fn failing_on(mut self, value: Value) -> Self {
        self.fail_on.push(value);
        self
    }
}

#[async_trait]
impl Stage for DoublingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value, _ctx: &PipelineContext) -> StageResult {
        if self.fail_on.contains(&input) {
            return StageResult::fail(format!("refusing to double {input}"));
        }
        match input.as_i64() {
            Some(number) => StageResult::ok(Value::from(number * 2)),
            None => match input.as_f64() {
                Some(number) => StageResult::ok(Value::from(number * 2.0)),
                None => StageResult::fail(format!("cannot double {input}")),
            },
        }
    }
}

/// An agent that replays a scripted list of runs.
///
/// Every call records the variables and state it received. Once the script
/// runs out, calls fail.
#[derive(Debug)]
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<AgentRun>>,
    calls: Mutex<Vec<(Map<String, Value>, Option<Value>)>>,
}

impl ScriptedAgent {
    /// Creates an agent with an empty script.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Appends a run to the script.
    #[must_use]
    pub fn then(self, run: AgentRun) -> Self {
        self.script.lock().push_back(run);
        self
    }

    /// Appends a successful run returning `data`.
    #[must_use]
    pub fn then_data(self, data: Value, tokens_used: u64) -> Self {
        self.then(AgentRun::ok(data).with_tokens(tokens_used))
    }

    /// Appends a failed run.
    #[must_use]
    pub fn then_failure(self, error: impl Into<String>, tokens_used: u64) -> Self {
        self.then(AgentRun::failed(error).with_tokens(tokens_used))
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the variables of each call.
    #[must_use]
    pub fn recorded_variables(&self) -> Vec<Map<String, Value>> {
        self.calls.lock().iter().map(|(vars, _)| vars.clone()).collect()
    }

    /// Returns the conversation state passed to each call.
    #[must_use]
    pub fn recorded_states(&self) -> Vec<Option<Value>> {
        self.calls.lock().iter().map(|(_, state)| state.clone()).collect()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, variables: &Map<String, Value>, state: Option<Value>) -> AgentRun {
        self.calls.lock().push((variables.clone(), state));
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| AgentRun::failed(format!("{} has no scripted response left", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_stage_records_inputs() {
        let stage = MockStage::returning("mock", StageResult::ok(json!("fixed")));
        let ctx = PipelineContext::new();

        let result = stage.execute(json!(1), &ctx).await;
        stage.execute(json!(2), &ctx).await;

        assert_eq!(result.output, Some(json!("fixed")));
        assert_eq!(stage.call_count(), 2);
        assert_eq!(stage.recorded_inputs(), vec![json!(1), json!(2)]);

        stage.reset();
        assert_eq!(stage.call_count(), 0);
    }

    #[tokio::test]
    async fn test_flaky_stage_recovers() {
        let stage = FlakyStage::new("flaky", 2, json!("done"));
        let ctx = PipelineContext::new();

        assert!(!stage.execute(Value::Null, &ctx).await.success());
        assert!(!stage.execute(Value::Null, &ctx).await.success());
        assert!(stage.execute(Value::Null, &ctx).await.success());
        assert_eq!(stage.calls(), 3);
    }

    #[tokio::test]
    async fn test_doubling_stage() {
        let stage = DoublingStage::new("double").failing_on(json!(3));
        let ctx = PipelineContext::new();

        assert_eq!(stage.execute(json!(4), &ctx).await.output, Some(json!(8)));
        assert_eq!(stage.execute(json!(1.5), &ctx).await.output, Some(json!(3.0)));
        assert!(!stage.execute(json!(3), &ctx).await.success());
        assert!(!stage.execute(json!("x"), &ctx).await.success());
    }

    #[tokio::test]
    async fn test_scripted_agent_replays_and_records() {
        let agent = ScriptedAgent::new("planner")
            .then_data(json!({"plan": 1}), 10)
            .then_failure("provider down", 2);

        let mut vars = Map::new();
        vars.insert("song".into(), json!("intro"));

        let first = agent.run(&vars, None).await;
        let second = agent.run(&vars, Some(json!({"turn": 1}))).await;
        let third = agent.run(&vars, None).await;

        assert!(first.success);
        assert_eq!(first.tokens_used, 10);
        assert!(!second.success);
        assert!(!third.success);
        assert!(third.error_message.unwrap().contains("no scripted response"));
        assert_eq!(agent.call_count(), 3);
        assert_eq!(agent.recorded_states()[1], Some(json!({"turn": 1})));
        assert_eq!(agent.recorded_variables()[0]["song"], json!("intro"));
    }
}
