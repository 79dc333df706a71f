//! Graph validation and wave planning.
//!
//! Planning is pure: it never touches a stage or a context. A wave is the
//! maximal set of not-yet-scheduled stages whose inputs were all scheduled in
//! earlier waves.

use super::{PipelineDefinition, StageDefinition};
use crate::core::ExecutionPattern;
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The computed execution order of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Stage ids grouped into waves, each in declaration order.
    pub waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Returns the number of waves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    /// Returns true if there are no waves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Returns the total number of scheduled stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Returns the wave index a stage was scheduled in.
    #[must_use]
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|stage| stage == id))
    }
}

/// Validates `pipeline` and groups its stages into waves.
///
/// # Errors
///
/// Returns a [`PipelineValidationError`] for duplicate or empty ids, self
/// dependencies, dangling inputs, invalid per-stage configuration, or cycles.
pub fn plan_waves(pipeline: &PipelineDefinition) -> Result<ExecutionPlan, PipelineValidationError> {
    validate(pipeline)?;

    let stages = &pipeline.stages;
    let index: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(position, stage)| (stage.id.as_str(), position))
        .collect();

    let mut pending: Vec<usize> = stages.iter().map(|stage| stage.inputs.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (position, stage) in stages.iter().enumerate() {
        for input in &stage.inputs {
            if let Some(&upstream) = index.get(input.as_str()) {
                dependents[upstream].push(position);
            }
        }
    }

    let mut ready: Vec<usize> = (0..stages.len()).filter(|&position| pending[position] == 0).collect();
    let mut scheduled = 0;
    let mut waves: Vec<Vec<String>> = Vec::new();

    while !ready.is_empty() {
        let mut next = Vec::new();
        for &position in &ready {
            for &dependent in &dependents[position] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();

        scheduled += ready.len();
        waves.push(ready.iter().map(|&position| stages[position].id.clone()).collect());
        ready = next;
    }

    if scheduled < stages.len() {
        // validate() rejects cycles, so this only guards against a
        // definition mutated between the two passes.
        let stuck: Vec<String> = stages
            .iter()
            .zip(&pending)
            .filter(|(_, count)| **count > 0)
            .map(|(stage, _)| stage.id.clone())
            .collect();
        return Err(PipelineValidationError::new(format!(
            "Deadlocked stage graph; remaining stages: {stuck:?}"
        ))
        .with_stages(stuck));
    }

    Ok(ExecutionPlan { waves })
}

/// Validates a pipeline definition without planning it.
///
/// # Errors
///
/// See [`plan_waves`].
pub fn validate(pipeline: &PipelineDefinition) -> Result<(), PipelineValidationError> {
    if pipeline.name.trim().is_empty() {
        return Err(PipelineValidationError::new(
            "Pipeline name cannot be empty or whitespace-only",
        ));
    }

    let mut ids: HashSet<&str> = HashSet::new();
    for stage in &pipeline.stages {
        if stage.id.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage id cannot be empty"));
        }
        if !ids.insert(stage.id.as_str()) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage id '{}'",
                stage.id
            ))
            .with_stages(vec![stage.id.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Stage id '{}' is declared more than once", stage.id),
                )
                .with_fix_hint("Give every stage a unique id."),
            ));
        }
    }

    for stage in &pipeline.stages {
        validate_stage(stage, &ids)?;
    }

    detect_cycles(pipeline)?;
    Ok(())
}

fn validate_stage(stage: &StageDefinition, ids: &HashSet<&str>) -> Result<(), PipelineValidationError> {
    for input in &stage.inputs {
        if *input == stage.id {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                stage.id
            ))
            .with_stages(vec![stage.id.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-SELF_DEP", "Stage lists itself as an input")
                    .with_fix_hint("Remove the stage's own id from its inputs."),
            ));
        }
        if !ids.contains(input.as_str()) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' depends on unknown stage '{}'",
                stage.id, input
            ))
            .with_stages(vec![stage.id.clone(), input.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-MISSING_DEP",
                    format!("Dependency '{input}' not found"),
                )
                .with_fix_hint("Check for typos in stage ids and make sure the upstream stage is part of the pipeline."),
            ));
        }
    }

    let config_error = |message: String| {
        PipelineValidationError::new(format!("Stage '{}': {message}", stage.id))
            .with_stages(vec![stage.id.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-CONFIG", message)
                    .with_context_entry("stage", stage.id.clone()),
            )
    };

    stage
        .retry_config
        .validate()
        .map_err(|err| config_error(err.to_string()))?;

    if stage.timeout_ms == Some(0) {
        return Err(config_error("timeout_ms must be positive".to_string()));
    }
    if stage.max_concurrent_fan_out == Some(0) {
        return Err(config_error("max_concurrent_fan_out must be positive".to_string()));
    }
    if stage.max_concurrent_fan_out.is_some() && stage.pattern != ExecutionPattern::FanOut {
        tracing::debug!(
            stage = %stage.id,
            pattern = %stage.pattern,
            "max_concurrent_fan_out is ignored outside the fan_out pattern"
        );
    }

    Ok(())
}

fn detect_cycles(pipeline: &PipelineDefinition) -> Result<(), CycleDetectedError> {
    let inputs: HashMap<&str, &[String]> = pipeline
        .stages
        .iter()
        .map(|stage| (stage.id.as_str(), stage.inputs.as_slice()))
        .collect();

    let mut visited = HashSet::new();
    for stage in &pipeline.stages {
        if visited.insert(stage.id.as_str()) {
            if let Some(cycle) = find_cycle(&stage.id, &inputs, &mut visited) {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }

    Ok(())
}

/// Depth-first walk along inputs from `start`, with an explicit stack so
/// long chains cannot exhaust the thread stack. Returns the first cycle
/// found, closed by repeating its first stage.
fn find_cycle<'a>(
    start: &'a str,
    inputs: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    let mut path: Vec<&'a str> = vec![start];
    let mut cursors: Vec<usize> = vec![0];
    let mut on_path: HashSet<&'a str> = HashSet::from([start]);

    while let Some(&node) = path.last() {
        let deps = inputs.get(node).copied().unwrap_or_default();
        let Some(cursor) = cursors.last_mut() else {
            break;
        };

        match deps.get(*cursor) {
            Some(dep) => {
                *cursor += 1;
                let dep = dep.as_str();
                if on_path.contains(dep) {
                    let begin = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[begin..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                if visited.insert(dep) {
                    on_path.insert(dep);
                    path.push(dep);
                    cursors.push(0);
                }
            }
            None => {
                on_path.remove(node);
                path.pop();
                cursors.pop();
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RetryConfig;
    use crate::stages::{NoOpStage, Stage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    fn def(id: &str, inputs: &[&str]) -> StageDefinition {
        StageDefinition::new(id, noop(id)).with_inputs(inputs.iter().copied())
    }

    fn pipeline(stages: Vec<StageDefinition>) -> PipelineDefinition {
        stages
            .into_iter()
            .fold(PipelineDefinition::new("test"), PipelineDefinition::with_stage)
    }

    #[test]
    fn test_linear_chain_has_one_stage_per_wave() {
        let plan = plan_waves(&pipeline(vec![def("a", &[]), def("b", &["a"]), def("c", &["b"])])).unwrap();

        assert_eq!(plan.waves, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(plan.stage_count(), 3);
    }

    #[test]
    fn test_diamond_groups_independent_stages() {
        let plan = plan_waves(&pipeline(vec![
            def("audio", &[]),
            def("beats", &["audio"]),
            def("lyrics", &["audio"]),
            def("choreo", &["beats", "lyrics"]),
        ]))
        .unwrap();

        assert_eq!(
            plan.waves,
            vec![vec!["audio"], vec!["beats", "lyrics"], vec!["choreo"]]
        );
        assert_eq!(plan.wave_of("lyrics"), Some(1));
        assert_eq!(plan.wave_of("nope"), None);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let plan = plan_waves(&pipeline(vec![def("c", &["b"]), def("b", &["a"]), def("a", &[])])).unwrap();
        assert_eq!(plan.waves, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_empty_pipeline_has_no_waves() {
        let plan = plan_waves(&PipelineDefinition::new("empty")).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let err = plan_waves(&pipeline(vec![def("a", &["b"]), def("b", &["a"])])).unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-CYCLE"));
        assert!(err.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_longer_cycle_reports_path() {
        let err = plan_waves(&pipeline(vec![
            def("root", &[]),
            def("x", &["root", "z"]),
            def("y", &["x"]),
            def("z", &["y"]),
        ]))
        .unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(err.stages.first(), err.stages.last());
        assert_eq!(err.stages.len(), 4);
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let err = plan_waves(&pipeline(vec![def("a", &["ghost"])])).unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-MISSING_DEP"));
        assert_eq!(err.stages, vec!["a", "ghost"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = plan_waves(&pipeline(vec![def("a", &[]), def("a", &[])])).unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-DUPLICATE"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = plan_waves(&pipeline(vec![def("a", &["a"])])).unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-SELF_DEP"));
    }

    #[test]
    fn test_invalid_stage_config_rejected() {
        let bad_retry = def("a", &[]).with_retry(RetryConfig::new().with_max_attempts(0));
        let err = plan_waves(&pipeline(vec![bad_retry])).unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-CONFIG"));

        let bad_fan_out = def("b", &[]).fan_out(Some(0));
        assert!(plan_waves(&pipeline(vec![bad_fan_out])).is_err());

        let bad_timeout = def("c", &[]).with_timeout_ms(0);
        assert!(plan_waves(&pipeline(vec![bad_timeout])).is_err());
    }

    #[test]
    fn test_blank_names_rejected() {
        assert!(validate(&PipelineDefinition::new("  ")).is_err());
        assert!(validate(&pipeline(vec![def("", &[])])).is_err());
    }

    fn long_chain(len: usize) -> Vec<StageDefinition> {
        (0..len)
            .map(|i| {
                let id = format!("s{i}");
                if i == 0 {
                    def(&id, &[])
                } else {
                    def(&id, &[&format!("s{}", i - 1)])
                }
            })
            .collect()
    }

    #[test]
    fn test_long_chain_plans_one_stage_per_wave() {
        let mut stages = long_chain(20_000);
        stages.reverse();

        let plan = plan_waves(&pipeline(stages)).unwrap();

        assert_eq!(plan.len(), 20_000);
        assert_eq!(plan.waves[0], vec!["s0"]);
        assert_eq!(plan.waves[19_999], vec!["s19999"]);
        assert!(plan.waves.iter().all(|wave| wave.len() == 1));
    }

    #[test]
    fn test_cycle_closing_a_long_chain_is_found() {
        let mut stages = long_chain(20_000);
        stages[0] = def("s0", &["s19999"]);

        let err = plan_waves(&pipeline(stages)).unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(err.stages.len(), 20_001);
        assert_eq!(err.stages.first(), err.stages.last());
    }
}
