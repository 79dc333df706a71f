//! The mutable context shared by every stage of one pipeline run.

use super::{MetricsBag, StateBag};
use crate::events::{EventSink, NoOpEventSink};
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A service handle owned by the caller (LLM provider, cache, ...).
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// The mutable context for a pipeline execution.
///
/// Created once per run and owned by that run. The executor only polls
/// cancellation, records metrics and emits events; everything else is for
/// stages.
pub struct PipelineContext {
    /// Run identifier.
    run_id: Uuid,
    /// Cancellation flag.
    cancelled: AtomicBool,
    /// Cancel reason (first one wins).
    cancel_reason: RwLock<Option<String>>,
    /// Cross-stage signaling state.
    pub state: StateBag,
    /// Metrics accumulator.
    pub metrics: MetricsBag,
    /// Externally owned services keyed by name.
    services: HashMap<String, ServiceHandle>,
    /// Event sink for emitting events.
    event_sink: Arc<dyn EventSink>,
}

impl PipelineContext {
    /// Creates a new pipeline context with a fresh run id and a no-op sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancelled: AtomicBool::new(false),
            cancel_reason: RwLock::new(None),
            state: StateBag::new(),
            metrics: MetricsBag::new(),
            services: HashMap::new(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Seeds an initial state entry.
    #[must_use]
    pub fn with_state(self, key: impl Into<String>, value: Value) -> Self {
        self.state.set(key, value);
        self
    }

    /// Registers an externally owned service.
    #[must_use]
    pub fn with_service<T: Any + Send + Sync>(mut self, name: impl Into<String>, service: Arc<T>) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Requests cancellation. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.cancel_reason.write() = Some(reason.into());
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancel reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.read().clone()
    }

    /// Records a metric, overwriting any previous value.
    pub fn add_metric(&self, key: impl Into<String>, value: Value) {
        self.metrics.record(key, value);
    }

    /// Gets a metric.
    #[must_use]
    pub fn metric(&self, key: &str) -> Option<Value> {
        self.metrics.get(key)
    }

    /// Gets a state value, or `default` if absent.
    #[must_use]
    pub fn get_state(&self, key: &str, default: Value) -> Value {
        self.state.get(key).unwrap_or(default)
    }

    /// Sets a state value.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.set(key, value);
    }

    /// Looks up a service by name and concrete type.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .get(name)
            .and_then(|handle| handle.clone().downcast::<T>().ok())
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Emits an event without blocking.
    pub fn try_emit_event(&self, event_type: &str, data: Option<Value>) {
        self.event_sink.try_emit(event_type, data);
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<&String> = self.services.keys().collect();
        services.sort();
        f.debug_struct("PipelineContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .field("state", &self.state)
            .field("metrics", &self.metrics)
            .field("services", &services)
            .finish_non_exhaustive()
    }
}
