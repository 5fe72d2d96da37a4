//! Integration Ports
//!
//! This module defines the capability contract every monitoring backend
//! implements, plus the optional metrics and logs capabilities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    IntegrationManager                        │
//! │     fan-out over Arc<dyn Integration>, narrows on demand     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!             ┌────────────────┼────────────────┐
//!             ▼                ▼                ▼
//!      ┌────────────┐  ┌──────────────┐  ┌──────────────────┐
//!      │  Grafana   │  │     Loki     │  │    Prometheus    │
//!      │ (base only)│  │ + Logs cap.  │  │ + Metrics cap.   │
//!      └────────────┘  └──────────────┘  └──────────────────┘
//! ```
//!
//! Capabilities are discovered at runtime through [`Integration::as_metrics`]
//! and [`Integration::as_logs`], so the manager never enumerates backend
//! types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::models::{
    AnalysisResult, IntegrationStatus, LogEntry, LogLevel, MetricKind, MetricValue,
};
use crate::error::Result;

/// Label set passed to metric operations.
pub type Labels = BTreeMap<String, String>;

// =============================================================================
// Base Contract
// =============================================================================

/// Base contract shared by every monitoring backend.
///
/// Once a backend is disabled every operation other than [`name`],
/// [`is_enabled`] and [`status`] is a no-op returning `Ok(())`.
///
/// [`name`]: Integration::name
/// [`is_enabled`]: Integration::is_enabled
/// [`status`]: Integration::status
#[async_trait]
pub trait Integration: Send + Sync {
    /// Unique name used as the manager's registry key.
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Snapshot of the current status.
    fn status(&self) -> IntegrationStatus;

    /// Connect to the backend. Disabled backends succeed without I/O.
    async fn initialize(&self) -> Result<()>;

    /// Record an analysis snapshot.
    async fn send_metrics(&self, result: &AnalysisResult) -> Result<()>;

    /// Send log entries immediately, bypassing any buffering.
    async fn send_logs(&self, entries: &[LogEntry]) -> Result<()>;

    /// Probe the backend and update the status.
    async fn test_connection(&self) -> Result<()>;

    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Narrow to the metrics capability, if implemented.
    fn as_metrics(&self) -> Option<&dyn MetricsIntegration> {
        None
    }

    /// Narrow to the logs capability, if implemented.
    fn as_logs(&self) -> Option<&dyn LogsIntegration> {
        None
    }
}

// =============================================================================
// Metrics Capability
// =============================================================================

/// Backends that keep a metric registry.
#[async_trait]
pub trait MetricsIntegration: Send + Sync {
    /// Register a metric family. Names are unique per backend instance.
    fn register_metric(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Result<()>;

    /// Set a gauge, or add to a counter.
    fn set_metric(&self, name: &str, value: f64, labels: &Labels) -> Result<()>;

    fn increment_counter(&self, name: &str, labels: &Labels) -> Result<()>;

    /// Record an observation on a histogram or summary.
    fn observe_metric(&self, name: &str, value: f64, labels: &Labels) -> Result<()>;

    /// Set ad hoc gauges from loosely typed values, registering as needed.
    async fn push_metrics(&self, values: &BTreeMap<String, MetricValue>) -> Result<()>;
}

// =============================================================================
// Logs Capability
// =============================================================================

/// Backends that batch and ship log entries.
#[async_trait]
pub trait LogsIntegration: Send + Sync {
    /// Buffer entries for the next flush.
    async fn write_logs(&self, entries: &[LogEntry]) -> Result<()>;

    /// Consume entries from `rx` until the channel closes or the backend
    /// shuts down.
    async fn stream_logs(&self, rx: mpsc::Receiver<LogEntry>) -> Result<()>;

    /// Entries below `level` are dropped by `write_logs`.
    fn set_log_level(&self, level: LogLevel);

    /// Merge labels applied to every stream this backend pushes.
    fn add_static_labels(&self, labels: BTreeMap<String, String>);
}
