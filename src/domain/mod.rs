//! Domain Layer
//!
//! - **Models** (`models.rs`) - status, log entries, analysis payload and metric value objects
//! - **Ports** (`ports.rs`) - the integration capability contract
//!
//! # Usage
//!
//! ```ignore
//! use signalmesh::domain::{Integration, LogEntry, LogLevel};
//!
//! async fn ship(backend: &dyn Integration, entries: &[LogEntry]) -> Result<()> {
//!     match backend.as_logs() {
//!         Some(logs) => logs.write_logs(entries).await,
//!         None => backend.send_logs(entries).await,
//!     }
//! }
//! ```

pub mod models;
pub mod ports;

pub use models::{
    AnalysisResult, ClientSummary, IntegrationStatus, LogEntry, LogLevel, MetricDescriptor,
    MetricKind, MetricValue,
};
pub use ports::{Integration, Labels, LogsIntegration, MetricsIntegration};
