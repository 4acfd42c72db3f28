//! Observability for the post generation pipeline.
//!
//! # Features
//! - Structured JSON or pretty logging via `tracing-subscriber`
//! - Logging macros for cache, retry, stage and external-call events
//! - [`MetricsContext`], an explicitly passed set of pipeline counters

pub mod init;
pub mod macros;
pub mod metrics;

pub use init::{init_tracing, LogFormat, TracingConfig};
pub use metrics::{MetricsContext, MetricsSnapshot, StrategyStats};

// Re-export tracing for convenience
pub use tracing::{debug, error, info, instrument, warn, Instrument};
