//! Observability: structured logging and client metrics

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{build_filter, effective_level, init_logging, parse_level, LogFormat};
pub use metrics::{ClientMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
