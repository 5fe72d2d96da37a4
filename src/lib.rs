//! signalmesh - Telemetry fan-out to monitoring backends
//!
//! Dispatches analysis snapshots and log records to Grafana, Loki and
//! Prometheus through one capability contract, with a dynamic metric
//! registry and a buffered log batcher.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     IntegrationManager                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Grafana    │    │     Loki     │    │  Prometheus  │       │
//! │  │ (dashboards) │    │ LogBatcher ──┼─▶  │ MetricRegistry│      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Grafana, Loki and Prometheus integrations
//! - [`config`] - YAML configuration and duration parsing
//! - [`dashboard`] - Dashboard model and panel layout
//! - [`domain`] - Capability ports and value objects
//! - [`error`] - Error types
//! - [`logs`] - Log batching, stream grouping and sinks
//! - [`manager`] - Integration registry and concurrent fan-out
//! - [`metrics`] - Dynamic metric registry

pub mod adapters;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod logs;
pub mod manager;
pub mod metrics;

// Re-export commonly used types
pub use config::IntegrationsConfig;
pub use domain::{
    AnalysisResult, Integration, IntegrationStatus, LogEntry, LogLevel, LogsIntegration,
    MetricKind, MetricValue, MetricsIntegration,
};
pub use error::{Error, Result};
pub use logs::LogBatcher;
pub use manager::IntegrationManager;
pub use metrics::MetricRegistry;
