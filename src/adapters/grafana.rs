//! Grafana Integration
//!
//! Base-capability backend: Grafana stores no metrics or logs itself, so
//! `send_metrics` and `send_logs` are no-ops. It exposes the dashboard and
//! datasource HTTP APIs and can provision the analysis dashboard on
//! initialize.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::GrafanaConfig;
use crate::dashboard::{Dashboard, DashboardRequest};
use crate::domain::models::{AnalysisResult, IntegrationStatus, LogEntry};
use crate::domain::ports::Integration;
use crate::error::{Error, Result};

/// Name under which the manager registers this integration.
pub const GRAFANA_INTEGRATION: &str = "grafana";

/// Namespace used when provisioning the analysis dashboard.
const DEFAULT_METRIC_NAMESPACE: &str = "signalmesh";

// =============================================================================
// API Types
// =============================================================================

/// Response of `GET /api/health`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrafanaHealth {
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub version: String,
}

/// Response of `POST /api/dashboards/db`
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardResponse {
    #[serde(default)]
    pub id: u64,
    pub uid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: u64,
}

/// Hit returned by `GET /api/search`
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSearchHit {
    #[serde(default)]
    pub id: u64,
    pub uid: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Datasource as listed by `GET /api/datasources`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Body of `POST /api/datasources`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub access: String,
    pub is_default: bool,
}

impl DatasourceRequest {
    /// Proxy-mode datasource of the given type.
    pub fn new(name: impl Into<String>, kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            url: url.into(),
            access: "proxy".to_string(),
            is_default: false,
        }
    }
}

// =============================================================================
// Grafana Integration
// =============================================================================

/// Client for the Grafana HTTP API.
pub struct GrafanaIntegration {
    config: GrafanaConfig,
    client: Client,
    base_url: String,
    metric_namespace: String,
    status: RwLock<IntegrationStatus>,
    closed: AtomicBool,
}

impl std::fmt::Debug for GrafanaIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrafanaIntegration")
            .field("url", &self.base_url)
            .field("org_id", &self.config.org_id)
            .finish()
    }
}

impl GrafanaIntegration {
    pub fn new(config: GrafanaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout()?)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            status: RwLock::new(IntegrationStatus::new(GRAFANA_INTEGRATION, config.enabled)),
            metric_namespace: DEFAULT_METRIC_NAMESPACE.to_string(),
            config,
            client,
            closed: AtomicBool::new(false),
        })
    }

    /// Metric namespace the provisioned dashboard queries.
    pub fn with_metric_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metric_namespace = namespace.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));

        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        } else if let Some(user) = self.config.username.as_deref().filter(|u| !u.is_empty()) {
            request = request.basic_auth(user, self.config.password.as_deref());
        }
        if let Some(org) = self.config.org_id {
            request = request.header("X-Grafana-Org-Id", org.to_string());
        }
        request
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| Error::Transport {
            integration: GRAFANA_INTEGRATION.to_string(),
            reason: e.to_string(),
        })?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Query `GET /api/health`.
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<GrafanaHealth> {
        self.execute(self.request(Method::GET, "/api/health"))
            .await
    }

    /// Create a dashboard, or replace it when `overwrite` is set.
    #[instrument(skip(self, dashboard), fields(title = %dashboard.title))]
    pub async fn create_dashboard(
        &self,
        dashboard: &Dashboard,
        overwrite: bool,
    ) -> Result<DashboardResponse> {
        let body = DashboardRequest::new(dashboard, overwrite)
            .with_folder(self.config.dashboard_folder_uid.clone())
            .with_message("Provisioned by signalmesh");

        let response: DashboardResponse = self
            .execute(self.request(Method::POST, "/api/dashboards/db").json(&body))
            .await?;
        debug!("Saved dashboard {} (version {})", response.uid, response.version);
        Ok(response)
    }

    /// Replace an existing dashboard with the same uid or title.
    pub async fn update_dashboard(&self, dashboard: &Dashboard) -> Result<DashboardResponse> {
        self.create_dashboard(dashboard, true).await
    }

    /// Search dashboards by title.
    #[instrument(skip(self))]
    pub async fn search_dashboards(&self, query: &str) -> Result<Vec<DashboardSearchHit>> {
        let path = format!(
            "/api/search?query={}&type=dash-db",
            urlencoding::encode(query)
        );
        self.execute(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self))]
    pub async fn list_datasources(&self) -> Result<Vec<Datasource>> {
        self.execute(self.request(Method::GET, "/api/datasources"))
            .await
    }

    /// Create a datasource and return Grafana's response document.
    #[instrument(skip(self, datasource), fields(name = %datasource.name))]
    pub async fn create_datasource(
        &self,
        datasource: &DatasourceRequest,
    ) -> Result<serde_json::Value> {
        self.execute(self.request(Method::POST, "/api/datasources").json(datasource))
            .await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(Error::Transport {
        integration: GRAFANA_INTEGRATION.to_string(),
        reason: format!("{}: {}", status, text.trim()),
    })
}

#[async_trait]
impl Integration for GrafanaIntegration {
    fn name(&self) -> &str {
        GRAFANA_INTEGRATION
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn status(&self) -> IntegrationStatus {
        self.status.read().clone()
    }

    async fn initialize(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        self.test_connection().await?;

        if self.config.provision_dashboard {
            let dashboard = Dashboard::analysis_overview(&self.metric_namespace);
            let saved = self.create_dashboard(&dashboard, true).await?;
            self.status
                .write()
                .metadata
                .insert("dashboard_uid".to_string(), saved.uid);
        }

        info!("Grafana integration ready at {}", self.base_url);
        Ok(())
    }

    async fn send_metrics(&self, _result: &AnalysisResult) -> Result<()> {
        debug!("Grafana does not ingest metrics directly");
        Ok(())
    }

    async fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        debug!("Grafana ignores {} log entries", entries.len());
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let outcome = self.health().await.map_err(|e| Error::Connection {
            integration: GRAFANA_INTEGRATION.to_string(),
            reason: e.to_string(),
        });

        let mut status = self.status.write();
        match outcome {
            Ok(health) => {
                status.mark_connected();
                if !health.version.is_empty() {
                    status.metadata.insert("version".to_string(), health.version);
                }
                if !health.database.is_empty() {
                    status
                        .metadata
                        .insert("database".to_string(), health.database);
                }
                Ok(())
            }
            Err(e) => {
                status.mark_error(&e);
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.status.write().connected = false;
            debug!("Grafana integration closed");
        }
        Ok(())
    }
}
