//! Observability utilities.
//!
//! Library code only emits `tracing` events and [`EventSink`](crate::events::EventSink)
//! events. Binaries and tests that want to see them install a subscriber
//! with [`init_tracing`].

mod subscriber;

pub use subscriber::{init_tracing, LogFormat, TracingConfig, LOG_ENV_VAR};
