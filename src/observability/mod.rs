//! Observability: structured logging and metrics collection
//!
//! Metrics transport and dashboarding stay outside the core; this module
//! holds the process-local collector and the tracing setup.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};
