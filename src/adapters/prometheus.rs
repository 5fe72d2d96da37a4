//! Prometheus Integration
//!
//! Records analysis snapshots into a [`MetricRegistry`] and, when a push
//! gateway is configured, pushes the text exposition after every update.
//! The registry can also be scraped directly (see the `serve-metrics`
//! command of the binary).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use prometheus::{Encoder, TextEncoder};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use crate::config::PrometheusConfig;
use crate::domain::models::{
    AnalysisResult, IntegrationStatus, LogEntry, MetricKind, MetricValue,
};
use crate::domain::ports::{Integration, Labels, MetricsIntegration};
use crate::error::{Error, Result};
use crate::metrics::MetricRegistry;

/// Name under which the manager registers this integration.
pub const PROMETHEUS_INTEGRATION: &str = "prometheus";

/// Label carried by per-client metrics.
pub const CLIENT_LABEL: &str = "client";

const ANALYSIS_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

// =============================================================================
// Analysis Metrics
// =============================================================================

/// Metric names recorded for every analysis snapshot.
pub mod names {
    pub const RUNS_TOTAL: &str = "analysis_runs_total";
    pub const REQUESTS: &str = "analysis_requests";
    pub const ERRORS: &str = "analysis_errors";
    pub const ERROR_RATE: &str = "analysis_error_rate";
    pub const AVG_RESPONSE_MS: &str = "analysis_avg_response_ms";
    pub const DURATION_SECONDS: &str = "analysis_duration_seconds";
    pub const CLIENT_REQUESTS: &str = "client_requests";
    pub const CLIENT_ERRORS: &str = "client_errors";
    pub const CLIENT_AVG_RESPONSE_MS: &str = "client_avg_response_ms";
}

// =============================================================================
// Prometheus Integration
// =============================================================================

/// Metrics-capable backend over a private prometheus registry.
pub struct PrometheusIntegration {
    config: PrometheusConfig,
    client: Client,
    registry: Arc<MetricRegistry>,
    status: RwLock<IntegrationStatus>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PrometheusIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusIntegration")
            .field("url", &self.config.url)
            .field("namespace", &self.config.namespace)
            .field("push_gateway", &self.config.push_gateway.enabled)
            .finish()
    }
}

impl PrometheusIntegration {
    pub fn new(config: PrometheusConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout()?)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let registry =
            MetricRegistry::with_prefix_and_labels(&config.namespace, &config.external_labels)?;

        let mut status = IntegrationStatus::new(PROMETHEUS_INTEGRATION, config.enabled);
        status
            .metadata
            .insert("namespace".to_string(), config.namespace.clone());
        if config.push_gateway.enabled {
            status
                .metadata
                .insert("push_gateway".to_string(), config.push_gateway.url.clone());
        }

        Ok(Self {
            config,
            client,
            registry: Arc::new(registry),
            status: RwLock::new(status),
            closed: AtomicBool::new(false),
        })
    }

    /// Shared handle to the metric registry.
    pub fn registry(&self) -> Arc<MetricRegistry> {
        Arc::clone(&self.registry)
    }

    /// Push gateway URL for the configured job and instance.
    pub fn push_url(&self) -> String {
        let gateway = &self.config.push_gateway;
        let mut url = format!(
            "{}/metrics/job/{}",
            gateway.url.trim_end_matches('/'),
            urlencoding::encode(&gateway.job)
        );
        if let Some(instance) = gateway.instance.as_deref().filter(|i| !i.is_empty()) {
            url.push_str("/instance/");
            url.push_str(&urlencoding::encode(instance));
        }
        url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn active(&self) -> bool {
        self.config.enabled && !self.closed.load(Ordering::Acquire)
    }

    fn register_analysis_metrics(&self) -> Result<()> {
        let gauges = [
            (names::REQUESTS, "Requests seen by the last analysis run"),
            (names::ERRORS, "Errors seen by the last analysis run"),
            (names::ERROR_RATE, "Error rate of the last analysis run"),
            (
                names::AVG_RESPONSE_MS,
                "Average response time of the last analysis run in milliseconds",
            ),
        ];
        for (name, help) in gauges {
            tolerate_existing(self.registry.register_metric(name, help, MetricKind::Gauge, &[]))?;
        }

        tolerate_existing(self.registry.register_metric(
            names::RUNS_TOTAL,
            "Analysis snapshots recorded",
            MetricKind::Counter,
            &[],
        ))?;
        tolerate_existing(self.registry.register_histogram(
            names::DURATION_SECONDS,
            "Wall-clock duration of analysis runs",
            &[],
            ANALYSIS_DURATION_BUCKETS.to_vec(),
        ))?;

        let per_client = [
            (names::CLIENT_REQUESTS, "Requests per client in the last analysis run"),
            (names::CLIENT_ERRORS, "Errors per client in the last analysis run"),
            (
                names::CLIENT_AVG_RESPONSE_MS,
                "Average response time per client in milliseconds",
            ),
        ];
        for (name, help) in per_client {
            tolerate_existing(self.registry.register_metric(
                name,
                help,
                MetricKind::Gauge,
                &[CLIENT_LABEL],
            ))?;
        }

        Ok(())
    }

    fn record_analysis(&self, result: &AnalysisResult) -> Result<()> {
        let none = Labels::new();
        let registry = &self.registry;

        // Zero-request runs can carry NaN ratios; skip those gauges rather
        // than failing halfway through the snapshot.
        let set_finite = |name: &str, value: f64, labels: &Labels| -> Result<()> {
            if value.is_finite() {
                registry.set_metric(name, value, labels)
            } else {
                warn!("Skipping non-finite value {} for {}", value, name);
                Ok(())
            }
        };

        registry.increment_counter(names::RUNS_TOTAL, &none)?;
        registry.set_metric(names::REQUESTS, result.total_requests as f64, &none)?;
        registry.set_metric(names::ERRORS, result.total_errors as f64, &none)?;
        set_finite(names::ERROR_RATE, result.error_rate, &none)?;
        set_finite(names::AVG_RESPONSE_MS, result.avg_response_ms, &none)?;
        if result.duration_seconds.is_finite() && result.duration_seconds >= 0.0 {
            registry.observe_metric(names::DURATION_SECONDS, result.duration_seconds, &none)?;
        }

        for (client, summary) in &result.clients {
            let mut labels = Labels::new();
            labels.insert(CLIENT_LABEL.to_string(), client.clone());
            registry.set_metric(names::CLIENT_REQUESTS, summary.requests as f64, &labels)?;
            registry.set_metric(names::CLIENT_ERRORS, summary.errors as f64, &labels)?;
            set_finite(names::CLIENT_AVG_RESPONSE_MS, summary.avg_response_ms, &labels)?;
        }

        debug!(
            "Recorded analysis snapshot with {} client(s)",
            result.clients.len()
        );
        Ok(())
    }

    /// Push the registry's exposition to the gateway, if one is enabled.
    #[instrument(skip(self))]
    pub async fn push_to_gateway(&self) -> Result<()> {
        if !self.config.push_gateway.enabled {
            return Ok(());
        }

        let encoder = TextEncoder::new();
        let body = self.registry.render()?;
        let url = self.push_url();

        let response = self
            .client
            .post(&url)
            .header("Content-Type", encoder.format_type())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport {
                integration: PROMETHEUS_INTEGRATION.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport {
                integration: PROMETHEUS_INTEGRATION.to_string(),
                reason: format!("push gateway returned {}: {}", status, text.trim()),
            });
        }

        debug!("Pushed metrics to {}", url);
        Ok(())
    }

    async fn probe(&self, base_url: &str) -> Result<()> {
        let url = format!("{}/-/healthy", base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Connection {
                integration: PROMETHEUS_INTEGRATION.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Connection {
                integration: PROMETHEUS_INTEGRATION.to_string(),
                reason: format!("{} returned {}", url, response.status()),
            });
        }
        Ok(())
    }

    fn record_outcome(&self, result: &Result<()>) {
        if let Err(e) = result {
            self.status.write().mark_error(e);
        }
    }
}

fn tolerate_existing(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) | Err(Error::AlreadyRegistered(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Integration for PrometheusIntegration {
    fn name(&self) -> &str {
        PROMETHEUS_INTEGRATION
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

        self.register_analysis_metrics()?;
        self.test_connection().await?;

        info!(
            "Prometheus integration ready (namespace {}, push gateway {})",
            self.config.namespace,
            if self.config.push_gateway.enabled {
                self.config.push_gateway.url.as_str()
            } else {
                "disabled"
            }
        );
        Ok(())
    }

    async fn send_metrics(&self, result: &AnalysisResult) -> Result<()> {
        if !self.active() {
            return Ok(());
        }

        let outcome = match self.record_analysis(result) {
            Ok(()) => self.push_to_gateway().await,
            Err(e) => Err(e),
        };
        self.record_outcome(&outcome);
        outcome
    }

    async fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        debug!("Prometheus ignores {} log entries", entries.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn test_connection(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let server = if self.config.url.trim().is_empty() {
            Err(Error::Connection {
                integration: PROMETHEUS_INTEGRATION.to_string(),
                reason: "no server url configured".to_string(),
            })
        } else {
            self.probe(&self.config.url).await
        };

        let outcome = match server {
            Err(e) if self.config.push_gateway.enabled => {
                warn!("Prometheus server probe failed ({}), trying push gateway", e);
                self.probe(&self.config.push_gateway.url).await
            }
            other => other,
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
        self.status.write().connected = false;
        debug!("Prometheus integration closed");
        Ok(())
    }

    fn as_metrics(&self) -> Option<&dyn MetricsIntegration> {
        Some(self)
    }
}

#[async_trait]
impl MetricsIntegration for PrometheusIntegration {
    fn register_metric(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.registry.register_metric(name, help, kind, label_names)
    }

    fn set_metric(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.registry.set_metric(name, value, labels)
    }

    fn increment_counter(&self, name: &str, labels: &Labels) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.registry.increment_counter(name, labels)
    }

    fn observe_metric(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.registry.observe_metric(name, value, labels)
    }

    async fn push_metrics(&self, values: &BTreeMap<String, MetricValue>) -> Result<()> {
        if !self.active() {
            return Ok(());
        }

        let outcome = match self.registry.push_metrics(values) {
            Ok(()) => self.push_to_gateway().await,
            Err(e) => Err(e),
        };
        self.record_outcome(&outcome);
        outcome
    }
}
