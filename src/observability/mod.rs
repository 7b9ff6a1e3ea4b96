//! Observability for the logging pipeline itself
//!
//! Structured diagnostics for the crate's own operation and process-wide
//! counters for what the sinks did with every record.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{
    base_filter, env_level, init_default_logging, init_logging, worker_subscriber, LogFormat,
};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::mqtt_span;
