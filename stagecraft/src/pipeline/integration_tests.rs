//! End-to-end scenarios for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::context::PipelineContext;
    use crate::core::StageStatus;
    use crate::events::{CollectingEventSink, EventSink};
    use crate::pipeline::{
        PipelineBuilder, PipelineDefinition, PipelineExecutor, RetryConfig, StageDefinition,
    };
    use crate::stages::{FnStage, NoOpStage, Stage, StageResult};
    use crate::testing::{
        DoublingStage, FailingStage, FlakyStage, MockStage, PanickingStage, SlowStage,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay_ms(1)
            .with_max_delay_ms(2)
    }

    fn returning(name: &str, value: Value) -> Arc<MockStage> {
        Arc::new(MockStage::returning(name, StageResult::ok(value)))
    }

    async fn run(pipeline: &PipelineDefinition, input: Value) -> (crate::pipeline::PipelineResult, Arc<PipelineContext>) {
        let ctx = Arc::new(PipelineContext::new());
        let result = PipelineExecutor::new().execute(pipeline, input, ctx.clone()).await;
        (result, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_with_flaky_middle_stage() {
        let flaky = Arc::new(FlakyStage::new("B", 2, json!("b-out")));
        let pipeline = PipelineBuilder::new("chain")
            .stage("A", returning("A", json!("a-out")), &[])
            .add_stage(
                StageDefinition::new("B", flaky.clone())
                    .with_input("A")
                    .with_retry(RetryConfig::new().with_max_attempts(3)),
            )
            .stage("C", Arc::new(NoOpStage::new("C")), &["B"])
            .build()
            .unwrap();

        let started = tokio::time::Instant::now();
        let (result, ctx) = run(&pipeline, json!("seed")).await;

        assert!(result.success);
        assert!(result.failed_stages.is_empty());
        assert_eq!(result.stage_results["B"].attempts, 3);
        assert_eq!(flaky.calls(), 3);
        assert_eq!(result.output("A"), Some(&json!("a-out")));
        assert_eq!(result.output("B"), Some(&json!("b-out")));
        assert_eq!(result.output("C"), Some(&json!("b-out")));
        assert_eq!(ctx.metric("B.attempts"), Some(json!(3)));
        // 1000ms then 2000ms of backoff under the default policy
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_fan_out_partial_success_and_critical_failure() {
        let tolerant = PipelineBuilder::new("fan")
            .stage("source", returning("source", json!([1, 2, 3])), &[])
            .add_stage(
                StageDefinition::new("double", Arc::new(DoublingStage::new("double").failing_on(json!(2))))
                    .with_input("source")
                    .fan_out(None),
            )
            .build()
            .unwrap();

        let (result, _) = run(&tolerant, Value::Null).await;
        assert!(result.success);
        assert_eq!(result.output("double"), Some(&json!([2, 6])));
        assert_eq!(result.stage_results["double"].metadata["fan_out_failed"], json!(1));

        let strict = PipelineBuilder::new("fan")
            .stage("source", returning("source", json!([1, 2, 3])), &[])
            .add_stage(
                StageDefinition::new("double", Arc::new(DoublingStage::new("double").failing_on(json!(2))))
                    .with_input("source")
                    .fan_out(Some(1))
                    .critical(),
            )
            .build()
            .unwrap();

        let (result, _) = run(&strict, Value::Null).await;
        assert!(!result.success);
        assert_eq!(result.failed_stages, vec!["double"]);
        assert!(result.output("double").is_none());
        assert!(result.stage_results["double"].error.as_deref().unwrap().contains("[1]"));
    }

    fn fail_fast_pipeline(fail_fast: bool) -> (PipelineDefinition, Arc<MockStage>, Arc<MockStage>) {
        let after = returning("after", json!("after-out"));
        let tail = returning("tail", json!("tail-out"));
        let pipeline = PipelineBuilder::new("ff")
            .add_stage(
                StageDefinition::new("bad", Arc::new(FailingStage::new("bad", "disk full")))
                    .critical()
                    .with_retry(RetryConfig::no_retry()),
            )
            .stage("side", returning("side", json!("side-out")), &[])
            .stage("after", after.clone(), &["side"])
            .stage("tail", tail.clone(), &["after"])
            .fail_fast(fail_fast)
            .build()
            .unwrap();
        (pipeline, after, tail)
    }

    #[tokio::test]
    async fn test_fail_fast_stops_later_waves() {
        let (pipeline, after, tail) = fail_fast_pipeline(true);

        let (result, _) = run(&pipeline, Value::Null).await;

        assert!(!result.success);
        assert_eq!(result.failed_stages, vec!["bad", "after", "tail"]);
        assert_eq!(result.aborted_by(), Some("bad"));
        assert_eq!(result.output("side"), Some(&json!("side-out")));
        assert_eq!(after.call_count(), 0);
        assert_eq!(tail.call_count(), 0);
        assert_eq!(result.stage_results["tail"].status, StageStatus::Cancel);
        assert_eq!(result.stage_results["tail"].attempts, 0);
    }

    #[tokio::test]
    async fn test_tolerant_run_continues_after_critical_failure() {
        let (pipeline, after, tail) = fail_fast_pipeline(false);

        let (result, _) = run(&pipeline, Value::Null).await;

        assert!(!result.success);
        assert_eq!(result.failed_stages, vec!["bad"]);
        assert!(result.aborted_by().is_none());
        assert_eq!(result.output("tail"), Some(&json!("tail-out")));
        assert_eq!(after.call_count(), 1);
        assert_eq!(tail.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_honoured_at_wave_boundary() {
        let canceller = FnStage::new("canceller", |input: Value, ctx: &PipelineContext| {
            ctx.cancel("user pressed stop");
            Ok(input)
        });
        let sibling = Arc::new(SlowStage::new("sibling", Duration::from_millis(20), json!("finished")));
        let downstream = returning("downstream", json!("never"));

        let pipeline = PipelineBuilder::new("cancel")
            .stage("canceller", Arc::new(canceller), &[])
            .stage("sibling", sibling.clone(), &[])
            .stage("downstream", downstream.clone(), &["canceller", "sibling"])
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, json!("go")).await;

        assert!(!result.success);
        assert!(result.was_cancelled());
        assert_eq!(result.metadata["cancel_reason"], json!("user pressed stop"));
        assert_eq!(result.output("sibling"), Some(&json!("finished")));
        assert_eq!(result.output("canceller"), Some(&json!("go")));
        assert_eq!(result.failed_stages, vec!["downstream"]);
        assert_eq!(downstream.call_count(), 0);
        assert_eq!(sibling.calls(), 1);
        assert!(result.cancel_requested());
    }

    #[tokio::test]
    async fn test_cancel_in_final_wave_is_reported() {
        let canceller = FnStage::new("canceller", |input: Value, ctx: &PipelineContext| {
            ctx.cancel("stop");
            Ok(input)
        });
        let pipeline = PipelineBuilder::new("late-cancel")
            .stage("canceller", Arc::new(canceller), &[])
            .build()
            .unwrap();

        let (result, ctx) = run(&pipeline, json!(1)).await;

        assert!(result.success);
        assert!(!result.was_cancelled());
        assert!(result.cancel_requested());
        assert!(ctx.is_cancelled());
        assert_eq!(result.metadata["cancel_reason"], json!("stop"));
    }

    #[tokio::test]
    async fn test_uncancelled_run_reports_no_cancel_request() {
        let pipeline = PipelineBuilder::new("plain")
            .stage("echo", Arc::new(NoOpStage::new("echo")), &[])
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, json!(1)).await;

        assert!(!result.cancel_requested());
        assert!(result.metadata.get("cancel_reason").is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_stage_metadata() {
        let stage = Arc::new(MockStage::returning(
            "quota",
            StageResult::fail("rate limited").with_metadata("retry_after_ms", json!(250)),
        ));
        let pipeline = PipelineBuilder::new("quota")
            .add_stage(StageDefinition::new("quota", stage.clone()).with_retry(fast_retry(2)))
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, json!(null)).await;

        let quota = result.stage_result("quota").unwrap();
        assert_eq!(quota.attempts, 2);
        assert_eq!(quota.metadata["retry_after_ms"], json!(250));
        assert_eq!(quota.metadata["last_error"], json!("rate limited"));
        assert_eq!(stage.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_stage() {
        let pipeline = PipelineBuilder::new("timeouts")
            .add_stage(
                StageDefinition::new("slow", Arc::new(SlowStage::new("slow", Duration::from_millis(500), json!(1))))
                    .with_timeout_ms(10)
                    .with_retry(RetryConfig::no_retry()),
            )
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, Value::Null).await;

        assert!(!result.success);
        let slow = &result.stage_results["slow"];
        assert_eq!(slow.metadata["timed_out"], json!(true));
        assert_eq!(slow.attempts, 1);
    }

    #[tokio::test]
    async fn test_panicking_stage_does_not_crash_run() {
        let pipeline = PipelineBuilder::new("panics")
            .add_stage(
                StageDefinition::new("boom", Arc::new(PanickingStage::new("boom", "stage exploded")))
                    .with_retry(fast_retry(2)),
            )
            .stage("fine", returning("fine", json!("ok")), &[])
            .stage("after", Arc::new(NoOpStage::new("after")), &["boom"])
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, Value::Null).await;

        assert!(!result.success);
        assert_eq!(result.failed_stages, vec!["boom"]);
        assert_eq!(result.output("fine"), Some(&json!("ok")));
        assert_eq!(result.stage_results["boom"].attempts, 2);
        assert!(result.stage_results["boom"].error.as_deref().unwrap().contains("stage exploded"));
        // A failed upstream contributes null
        assert_eq!(result.output("after"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_conditional_stage_sees_earlier_state() {
        let detect = FnStage::new("detect", |_input: Value, ctx: &PipelineContext| {
            ctx.set_state("has_lyrics", json!(true));
            Ok(json!("vocals"))
        });
        let lyrics = returning("lyrics", json!("lyric cues"));
        let instrumental = returning("instrumental", json!("beat cues"));

        let pipeline = PipelineBuilder::new("conditional")
            .stage("detect", Arc::new(detect), &[])
            .add_stage(
                StageDefinition::new("lyrics", lyrics.clone())
                    .with_input("detect")
                    .when(|ctx| ctx.get_state("has_lyrics", json!(false)) == json!(true)),
            )
            .add_stage(
                StageDefinition::new("instrumental", instrumental.clone())
                    .with_input("detect")
                    .when(|ctx| ctx.get_state("has_lyrics", json!(false)) == json!(false)),
            )
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, Value::Null).await;

        assert!(result.success);
        assert_eq!(result.output("lyrics"), Some(&json!("lyric cues")));
        assert!(result.output("instrumental").is_none());
        assert!(result.stage_results["instrumental"].is_skipped());
        assert_eq!(instrumental.call_count(), 0);
        assert_eq!(lyrics.recorded_inputs(), vec![json!("vocals")]);
        assert_eq!(result.counts().skipped, 1);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_without_running_stages() {
        let a = returning("a", json!(1));
        let b = returning("b", json!(2));
        let pipeline = PipelineDefinition::new("loop")
            .with_stage(StageDefinition::new("a", a.clone()).with_input("b"))
            .with_stage(StageDefinition::new("b", b.clone()).with_input("a"));

        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Arc::new(PipelineContext::new().with_event_sink(sink.clone() as Arc<dyn EventSink>));
        let result = PipelineExecutor::new().execute(&pipeline, Value::Null, ctx).await;

        assert!(!result.success);
        assert_eq!(result.failed_stages, vec!["validation"]);
        assert!(result.is_validation_failure());
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 0);
        assert_eq!(sink.event_types(), vec!["pipeline.validation_failed"]);
    }

    #[tokio::test]
    async fn test_multiple_inputs_are_keyed_by_upstream() {
        let merge = returning("merge", json!("merged"));
        let pipeline = PipelineBuilder::new("merge")
            .stage("beats", returning("beats", json!([0.5, 1.0])), &[])
            .stage("sections", returning("sections", json!(["intro"])), &[])
            .stage("merge", merge.clone(), &["beats", "sections"])
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, Value::Null).await;

        assert!(result.success);
        assert_eq!(
            merge.recorded_inputs(),
            vec![json!({"beats": [0.5, 1.0], "sections": ["intro"]})]
        );
        assert_eq!(result.metadata["waves"], json!([["beats", "sections"], ["merge"]]));
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Arc::new(PipelineContext::new().with_event_sink(sink.clone() as Arc<dyn EventSink>));
        let pipeline = PipelineBuilder::new("events")
            .stage("only", Arc::new(NoOpStage::new("only")), &[])
            .build()
            .unwrap();

        let result = PipelineExecutor::new().execute(&pipeline, json!(1), ctx).await;

        assert!(result.success);
        assert_eq!(
            sink.event_types(),
            vec!["pipeline.started", "stage.started", "stage.completed", "pipeline.completed"]
        );
    }

    #[tokio::test]
    async fn test_retrying_events_are_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Arc::new(PipelineContext::new().with_event_sink(sink.clone() as Arc<dyn EventSink>));
        let pipeline = PipelineBuilder::new("retry-events")
            .add_stage(
                StageDefinition::new("flaky", Arc::new(FlakyStage::new("flaky", 1, json!("ok"))))
                    .with_retry(fast_retry(3)),
            )
            .build()
            .unwrap();

        let result = PipelineExecutor::new().execute(&pipeline, Value::Null, ctx).await;

        assert!(result.success);
        let retries = sink.events_of_type("stage.retrying");
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].1.as_ref().unwrap()["attempt"], json!(1));
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds_trivially() {
        let (result, _) = run(&PipelineDefinition::new("empty"), json!(null)).await;

        assert!(result.success);
        assert!(result.stage_results.is_empty());
    }

    #[tokio::test]
    async fn test_stage_name_is_stamped() {
        #[derive(Debug)]
        struct Anonymous;

        #[async_trait::async_trait]
        impl Stage for Anonymous {
            fn name(&self) -> &str {
                "anonymous"
            }

            async fn execute(&self, _input: Value, _ctx: &PipelineContext) -> StageResult {
                StageResult::ok_empty()
            }
        }

        let pipeline = PipelineBuilder::new("names")
            .stage("anon", Arc::new(Anonymous), &[])
            .build()
            .unwrap();

        let (result, _) = run(&pipeline, Value::Null).await;

        assert_eq!(result.stage_results["anon"].stage_name, "anonymous");
        assert!(result.output("anon").is_none());
    }
}
