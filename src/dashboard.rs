//! Dashboard model
//!
//! A small panel-list description of a Grafana dashboard and its
//! translation into the JSON document the dashboards API expects.
//!
//! # Layout
//!
//! Panels are placed on a two-column grid purely from their index:
//!
//! ```text
//!   x=0            x=12
//!  ┌────────────┬────────────┐ y=0
//!  │  panel 0   │  panel 1   │
//!  ├────────────┼────────────┤ y=8
//!  │  panel 2   │  panel 3   │
//!  └────────────┴────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Panel width in grid units.
pub const PANEL_WIDTH: u32 = 12;
/// Panel height in grid units.
pub const PANEL_HEIGHT: u32 = 8;

/// Uid of the dashboard built by [`Dashboard::analysis_overview`].
pub const ANALYSIS_DASHBOARD_UID: &str = "signalmesh-analysis";

// =============================================================================
// Model
// =============================================================================

/// One visualisation with a single query target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    pub id: u32,
    pub title: String,
    /// Grafana panel type (`timeseries`, `stat`, `gauge`, ...)
    pub panel_type: String,
    /// PromQL expression
    pub query: String,
    pub datasource: Option<String>,
}

impl Panel {
    pub fn new(
        id: u32,
        title: impl Into<String>,
        panel_type: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            panel_type: panel_type.into(),
            query: query.into(),
            datasource: None,
        }
    }

    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = Some(datasource.into());
        self
    }

    /// Grid position for the panel at `index`.
    pub fn grid_pos(index: usize) -> GridPos {
        let index = index as u32;
        GridPos {
            w: PANEL_WIDTH,
            h: PANEL_HEIGHT,
            x: (index % 2) * PANEL_WIDTH,
            y: (index / 2) * PANEL_HEIGHT,
        }
    }

    fn to_document(&self, index: usize) -> Value {
        let mut doc = json!({
            "id": self.id,
            "title": self.title,
            "type": self.panel_type,
            "gridPos": Self::grid_pos(index),
            "targets": [{ "refId": "A", "expr": self.query }],
        });
        if let Some(datasource) = &self.datasource {
            doc["datasource"] = json!(datasource);
        }
        doc
    }
}

/// Panel placement in Grafana grid units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPos {
    pub w: u32,
    pub h: u32,
    pub x: u32,
    pub y: u32,
}

/// Dashboard description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub uid: Option<String>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub panels: Vec<Panel>,
    /// Auto-refresh interval, e.g. `"30s"`
    pub refresh: String,
    /// Start of the default time range, e.g. `"now-6h"`
    pub time_from: String,
}

impl Dashboard {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            uid: None,
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            panels: Vec::new(),
            refresh: "30s".to_string(),
            time_from: "now-6h".to_string(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_panel(mut self, panel: Panel) -> Self {
        self.panels.push(panel);
        self
    }

    /// Dashboard JSON in the shape the dashboards API stores.
    pub fn to_document(&self) -> Value {
        let panels: Vec<Value> = self
            .panels
            .iter()
            .enumerate()
            .map(|(i, p)| p.to_document(i))
            .collect();

        let mut doc = json!({
            "id": null,
            "title": self.title,
            "description": self.description,
            "tags": self.tags,
            "timezone": "browser",
            "schemaVersion": 39,
            "refresh": self.refresh,
            "time": { "from": self.time_from, "to": "now" },
            "panels": panels,
        });
        if let Some(uid) = &self.uid {
            doc["uid"] = json!(uid);
        }
        doc
    }

    /// Default dashboard over the analysis metrics recorded by the
    /// Prometheus integration under `namespace`.
    pub fn analysis_overview(namespace: &str) -> Self {
        let metric = |name: &str| {
            if namespace.is_empty() {
                name.to_string()
            } else {
                format!("{}_{}", namespace, name)
            }
        };

        let mut dashboard = Dashboard::new("Traffic Analysis Overview")
            .with_uid(ANALYSIS_DASHBOARD_UID)
            .with_panel(Panel::new(
                1,
                "Requests",
                "stat",
                metric("analysis_requests"),
            ))
            .with_panel(Panel::new(2, "Errors", "stat", metric("analysis_errors")))
            .with_panel(Panel::new(
                3,
                "Error Rate",
                "timeseries",
                metric("analysis_error_rate"),
            ))
            .with_panel(Panel::new(
                4,
                "Average Response Time (ms)",
                "timeseries",
                metric("analysis_avg_response_ms"),
            ))
            .with_panel(Panel::new(
                5,
                "Requests by Client",
                "timeseries",
                format!("sum by (client) ({})", metric("client_requests")),
            ))
            .with_panel(Panel::new(
                6,
                "Analysis Duration p95",
                "timeseries",
                format!(
                    "histogram_quantile(0.95, rate({}_bucket[5m]))",
                    metric("analysis_duration_seconds")
                ),
            ));
        dashboard.description = "Aggregates recorded from each analysis run".to_string();
        dashboard.tags = vec!["signalmesh".to_string(), "analysis".to_string()];
        dashboard
    }
}

// =============================================================================
// API Request
// =============================================================================

/// Body of `POST /api/dashboards/db`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRequest {
    pub dashboard: Value,
    pub overwrite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DashboardRequest {
    pub fn new(dashboard: &Dashboard, overwrite: bool) -> Self {
        Self {
            dashboard: dashboard.to_document(),
            overwrite,
            folder_uid: None,
            message: None,
        }
    }

    pub fn with_folder(mut self, folder_uid: Option<String>) -> Self {
        self.folder_uid = folder_uid;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
