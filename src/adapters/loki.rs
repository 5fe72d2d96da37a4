//! Loki Integration
//!
//! Logs-capable backend. Entries written through [`LogsIntegration`] go
//! through a [`LogBatcher`]; `send_logs` pushes immediately.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::config::LokiConfig;
use crate::domain::models::{AnalysisResult, IntegrationStatus, LogEntry, LogLevel};
use crate::domain::ports::{Integration, LogsIntegration};
use crate::error::{Error, Result};
use crate::logs::{BatcherConfig, BatcherStats, LogBatcher, LogSink, LokiPushSink};

/// Name under which the manager registers this integration.
pub const LOKI_INTEGRATION: &str = "loki";

/// Component label of the summary entry written for each analysis run.
pub const ANALYZER_COMPONENT: &str = "analyzer";

/// Loki backend with a buffered log pipeline.
pub struct LokiIntegration {
    config: LokiConfig,
    client: Client,
    batcher: Arc<LogBatcher>,
    status: RwLock<IntegrationStatus>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LokiIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiIntegration")
            .field("url", &self.config.url)
            .field("tenant_id", &self.config.tenant_id)
            .field("batcher", &self.batcher)
            .finish()
    }
}

impl LokiIntegration {
    /// Create an integration that pushes to the configured Loki server.
    pub fn new(config: LokiConfig) -> Result<Self> {
        let sink = LokiPushSink::new(&config.url, config.timeout()?)?
            .with_tenant(config.tenant_id.clone())
            .with_basic_auth(config.username.clone(), config.password.clone());
        Self::with_sink(config, Arc::new(sink))
    }

    /// Create an integration that pushes streams to `sink`.
    pub fn with_sink(config: LokiConfig, sink: Arc<dyn LogSink>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout()?)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let batcher = LogBatcher::new(BatcherConfig::from(&config), sink);

        let mut status = IntegrationStatus::new(LOKI_INTEGRATION, config.enabled);
        status
            .metadata
            .insert("buffer_size".to_string(), batcher.capacity().to_string());
        status.metadata.insert(
            "flush_interval".to_string(),
            format!("{:?}", batcher.flush_interval()),
        );
        if let Some(tenant) = &config.tenant_id {
            status
                .metadata
                .insert("tenant_id".to_string(), tenant.clone());
        }

        Ok(Self {
            config,
            client,
            batcher,
            status: RwLock::new(status),
            closed: AtomicBool::new(false),
        })
    }

    pub fn batcher(&self) -> &Arc<LogBatcher> {
        &self.batcher
    }

    pub fn stats(&self) -> BatcherStats {
        self.batcher.stats()
    }

    fn active(&self) -> bool {
        self.config.enabled && !self.closed.load(Ordering::Acquire)
    }

    fn record_outcome(&self, result: &Result<()>) {
        if let Err(e) = result {
            self.status.write().last_error = Some(e.to_string());
        }
    }
}

/// Log entry summarising one analysis run.
pub fn analysis_entry(result: &AnalysisResult) -> LogEntry {
    let level = if result.total_errors > 0 {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };

    LogEntry::new(level, "analysis completed")
        .with_timestamp(result.analyzed_at)
        .with_component(ANALYZER_COMPONENT)
        .with_field("total_requests", result.total_requests)
        .with_field("total_errors", result.total_errors)
        .with_field("error_rate", result.error_rate)
        .with_field("avg_response_ms", result.avg_response_ms)
        .with_field("duration_seconds", result.duration_seconds)
        .with_field("clients", result.clients.len() as u64)
}

#[async_trait]
impl Integration for LokiIntegration {
    fn name(&self) -> &str {
        LOKI_INTEGRATION
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn status(&self) -> IntegrationStatus {
        let mut status = self.status.read().clone();
        status
            .metadata
            .insert("buffered".to_string(), self.batcher.buffered_len().to_string());
        status
    }

    async fn initialize(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        self.test_connection().await?;
        self.batcher.start();

        info!(
            "Loki integration ready ({} entries, flush every {:?})",
            self.batcher.capacity(),
            self.batcher.flush_interval()
        );
        Ok(())
    }

    async fn send_metrics(&self, result: &AnalysisResult) -> Result<()> {
        if !self.active() {
            return Ok(());
        }

        let outcome = self.batcher.write_logs(&[analysis_entry(result)]).await;
        self.record_outcome(&outcome);
        outcome
    }

    async fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let outcome = self.batcher.send_logs(entries).await;
        self.record_outcome(&outcome);
        outcome
    }

    #[instrument(skip(self))]
    async fn test_connection(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let url = format!("{}/ready", self.config.url.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(tenant) = self.config.tenant_id.as_deref().filter(|t| !t.is_empty()) {
            request = request.header("X-Scope-OrgID", tenant);
        }
        if let Some(user) = self.config.username.as_deref().filter(|u| !u.is_empty()) {
            request = request.basic_auth(user, self.config.password.as_deref());
        }

        let outcome = match request.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(Error::Connection {
                integration: LOKI_INTEGRATION.to_string(),
                reason: format!("{} returned {}", url, response.status()),
            }),
            Err(e) => Err(Error::Connection {
                integration: LOKI_INTEGRATION.to_string(),
                reason: e.to_string(),
            }),
        };

        match &outcome {
            Ok(()) => self.status.write().mark_connected(),
            Err(e) => self.status.write().mark_error(e),
        }
        outcome
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let outcome = self.batcher.close().await;
        self.status.write().connected = false;
        debug!("Loki integration closed: {:?}", self.batcher.stats());
        outcome
    }

    fn as_logs(&self) -> Option<&dyn LogsIntegration> {
        Some(self)
    }
}

#[async_trait]
impl LogsIntegration for LokiIntegration {
    async fn write_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let outcome = self.batcher.write_logs(entries).await;
        self.record_outcome(&outcome);
        outcome
    }

    async fn stream_logs(&self, rx: mpsc::Receiver<LogEntry>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.batcher.stream_logs(rx).await
    }

    fn set_log_level(&self, level: LogLevel) {
        self.batcher.set_min_level(level);
    }

    fn add_static_labels(&self, labels: BTreeMap<String, String>) {
        self.batcher.add_static_labels(labels);
    }
}
