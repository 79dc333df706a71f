//! Event sink system for observability.
//!
//! The executor and the iteration controller report lifecycle events
//! (`pipeline.*`, `stage.*`, `iteration.*`) to an injected [`EventSink`].
//! Nothing here is global: a run without a sink uses [`NoOpEventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};
