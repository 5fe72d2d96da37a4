//! Metrics module
//!
//! Dynamic metric registry used by metrics-capable integrations.

mod registry;

pub use registry::{sanitize_metric_name, MetricRegistry};
