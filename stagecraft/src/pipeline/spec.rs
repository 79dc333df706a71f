//! Declarative stage and pipeline definitions.

use super::RetryConfig;
use crate::context::PipelineContext;
use crate::core::ExecutionPattern;
use crate::stages::Stage;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding at execution time whether a conditional stage runs.
pub type StageCondition = Arc<dyn Fn(&PipelineContext) -> bool + Send + Sync>;

/// One stage's place in the graph.
#[derive(Clone)]
pub struct StageDefinition {
    /// Unique id within the pipeline.
    pub id: String,
    /// The stage implementation.
    pub stage: Arc<dyn Stage>,
    /// Upstream stage ids, in order. Empty means the stage receives the
    /// pipeline's initial input.
    pub inputs: Vec<String>,
    /// How the stage is invoked.
    pub pattern: ExecutionPattern,
    /// Evaluated lazily for `Conditional` stages.
    pub condition: Option<StageCondition>,
    /// Whether a failure here can abort the run under fail-fast.
    pub critical: bool,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retry policy.
    pub retry_config: RetryConfig,
    /// Concurrency cap for `FanOut` stages.
    pub max_concurrent_fan_out: Option<usize>,
}

impl StageDefinition {
    /// Creates a sequential, non-critical definition with the default retry policy.
    #[must_use]
    pub fn new(id: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        Self {
            id: id.into(),
            stage,
            inputs: Vec::new(),
            pattern: ExecutionPattern::Sequential,
            condition: None,
            critical: false,
            timeout_ms: None,
            retry_config: RetryConfig::default(),
            max_concurrent_fan_out: None,
        }
    }

    /// Sets the upstream inputs. Duplicates keep their first position.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs.clear();
        for input in inputs {
            self = self.with_input(input);
        }
        self
    }

    /// Adds one upstream input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        let input = input.into();
        if !self.inputs.contains(&input) {
            self.inputs.push(input);
        }
        self
    }

    /// Makes the stage conditional on `condition`.
    #[must_use]
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&PipelineContext) -> bool + Send + Sync + 'static,
    {
        self.pattern = ExecutionPattern::Conditional;
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Runs the stage once per element of its list-shaped input.
    #[must_use]
    pub fn fan_out(mut self, max_concurrent: Option<usize>) -> Self {
        self.pattern = ExecutionPattern::FanOut;
        self.max_concurrent_fan_out = max_concurrent;
        self
    }

    /// Marks the stage as critical.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("id", &self.id)
            .field("stage", &self.stage.name())
            .field("inputs", &self.inputs)
            .field("pattern", &self.pattern)
            .field("has_condition", &self.condition.is_some())
            .field("critical", &self.critical)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_config", &self.retry_config)
            .field("max_concurrent_fan_out", &self.max_concurrent_fan_out)
            .finish()
    }
}

/// A whole stage graph plus its failure policy.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// The pipeline name.
    pub name: String,
    /// Stage definitions, in declaration order.
    pub stages: Vec<StageDefinition>,
    /// Stop the run when a critical stage fails.
    pub fail_fast: bool,
}

impl PipelineDefinition {
    /// Creates an empty, fail-fast pipeline definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            fail_fast: true,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the fail-fast policy.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.id == id)
    }

    /// Returns the stage ids in declaration order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.id.as_str()).collect()
    }
}
