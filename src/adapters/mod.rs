//! Backend Adapters
//!
//! Implementations of the integration ports, one per monitoring backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  Integration │ MetricsIntegration │ LogsIntegration        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ GrafanaIntegration │ LokiIntegration │ PrometheusIntegration│ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use signalmesh::adapters::PrometheusIntegration;
//! use signalmesh::domain::Integration;
//!
//! let prometheus = PrometheusIntegration::new(config.prometheus.clone())?;
//! prometheus.initialize().await?;
//! prometheus.send_metrics(&result).await?;
//! ```

mod grafana;
mod loki;
mod prometheus;

pub use self::grafana::{
    DashboardResponse, DashboardSearchHit, Datasource, DatasourceRequest, GrafanaHealth,
    GrafanaIntegration, GRAFANA_INTEGRATION,
};
pub use self::loki::{analysis_entry, LokiIntegration, ANALYZER_COMPONENT, LOKI_INTEGRATION};
pub use self::prometheus::{names, PrometheusIntegration, CLIENT_LABEL, PROMETHEUS_INTEGRATION};
