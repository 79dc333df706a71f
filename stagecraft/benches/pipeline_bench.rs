//! Benchmarks for wave planning and pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use stagecraft::context::PipelineContext;
use stagecraft::pipeline::{plan_waves, PipelineDefinition, PipelineExecutor, StageDefinition};
use stagecraft::stages::NoOpStage;
use std::sync::Arc;

fn noop(id: &str) -> StageDefinition {
    StageDefinition::new(id, Arc::new(NoOpStage::new(id)))
}

/// `width` independent stages joined by one sink.
fn wide(width: usize) -> PipelineDefinition {
    let mut pipeline = PipelineDefinition::new("wide");
    let ids: Vec<String> = (0..width).map(|i| format!("leaf{i}")).collect();
    for id in &ids {
        pipeline = pipeline.with_stage(noop(id));
    }
    pipeline.with_stage(noop("sink").with_inputs(ids))
}

/// A single chain of `depth` stages.
fn deep(depth: usize) -> PipelineDefinition {
    let mut pipeline = PipelineDefinition::new("deep").with_stage(noop("s0"));
    for i in 1..depth {
        pipeline = pipeline.with_stage(noop(&format!("s{i}")).with_input(format!("s{}", i - 1)));
    }
    pipeline
}

fn planning_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_waves");
    for size in [10, 100, 500] {
        let wide_graph = wide(size);
        group.bench_with_input(BenchmarkId::new("wide", size), &wide_graph, |b, graph| {
            b.iter(|| black_box(plan_waves(graph)));
        });
        let deep_graph = deep(size);
        group.bench_with_input(BenchmarkId::new("deep", size), &deep_graph, |b, graph| {
            b.iter(|| black_box(plan_waves(graph)));
        });
    }
    group.finish();
}

fn execution_benchmark(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    let executor = PipelineExecutor::new();
    let pipeline = wide(50);

    c.bench_function("execute_wide_50", |b| {
        b.iter(|| {
            let result = runtime.block_on(executor.execute(
                &pipeline,
                json!({"n": 1}),
                Arc::new(PipelineContext::new()),
            ));
            black_box(result.success)
        });
    });
}

criterion_group!(benches, planning_benchmark, execution_benchmark);
criterion_main!(benches);
