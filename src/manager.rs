//! Integration Manager
//!
//! Owns the registered integrations and fans analysis snapshots and log
//! entries out to them concurrently.
//!
//! # Fan-out
//!
//! ```text
//!                    ┌──▶ task(grafana)    ──┐
//! send_to_all(r) ────┼──▶ task(loki)       ──┼──▶ join all ──▶ Ok | Integrations([...])
//!                    └──▶ task(prometheus) ──┘
//! ```
//!
//! One task per enabled integration. Every task is joined; a failure in one
//! never cancels its siblings, and every failure is reported.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{GrafanaIntegration, LokiIntegration, PrometheusIntegration};
use crate::config::IntegrationsConfig;
use crate::domain::models::{AnalysisResult, IntegrationStatus, LogEntry};
use crate::domain::ports::Integration;
use crate::error::{Error, IntegrationFailure, Result};

#[derive(Default)]
struct ManagerState {
    integrations: HashMap<String, Arc<dyn Integration>>,
    /// Names constructed by `initialize`, replaced on the next call
    builtins: HashSet<String>,
    initialized: bool,
}

/// Registry and dispatcher for monitoring integrations.
pub struct IntegrationManager {
    config: IntegrationsConfig,
    state: RwLock<ManagerState>,
    init_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for IntegrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        let mut names: Vec<&String> = state.integrations.keys().collect();
        names.sort();
        f.debug_struct("IntegrationManager")
            .field("enabled", &self.config.enabled)
            .field("initialized", &state.initialized)
            .field("integrations", &names)
            .finish()
    }
}

impl IntegrationManager {
    pub fn new(config: IntegrationsConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Create a manager whose in-flight fan-out tasks stop when `token` is
    /// cancelled.
    pub fn with_cancellation(config: IntegrationsConfig, token: CancellationToken) -> Self {
        Self {
            config,
            state: RwLock::new(ManagerState::default()),
            init_lock: Mutex::new(()),
            cancel: token,
        }
    }

    pub fn config(&self) -> &IntegrationsConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Construct and initialize every enabled built-in integration.
    ///
    /// The first failure aborts the call; integrations registered before it
    /// stay registered. Calls are serialised. After [`close`] or a failed
    /// call, the next call builds fresh built-ins in place of the old ones;
    /// integrations added with [`register_integration`] are kept as they are.
    ///
    /// [`close`]: IntegrationManager::close
    /// [`register_integration`]: IntegrationManager::register_integration
    pub async fn initialize(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Integrations disabled, skipping initialization");
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        if self.config.grafana.enabled {
            let grafana = GrafanaIntegration::new(self.config.grafana.clone())
                .map(|g| g.with_metric_namespace(self.config.prometheus.namespace.clone()));
            self.start_builtin("grafana", grafana).await?;
        }
        if self.config.loki.enabled {
            let loki = LokiIntegration::new(self.config.loki.clone());
            self.start_builtin("loki", loki).await?;
        }
        if self.config.prometheus.enabled {
            let prometheus = PrometheusIntegration::new(self.config.prometheus.clone());
            self.start_builtin("prometheus", prometheus).await?;
        }

        let mut state = self.state.write();
        state.initialized = true;
        info!(
            "Integration manager initialized with {} integration(s)",
            state.integrations.len()
        );
        Ok(())
    }

    async fn start_builtin<I>(&self, name: &str, constructed: Result<I>) -> Result<()>
    where
        I: Integration + 'static,
    {
        let wrap = |source: Error| Error::Initialization {
            integration: name.to_string(),
            source: Box::new(source),
        };
        let taken = |state: &ManagerState| {
            !state.builtins.contains(name) && state.integrations.contains_key(name)
        };

        if taken(&*self.state.read()) {
            return Err(wrap(Error::DuplicateIntegration(name.to_string())));
        }

        let integration: Arc<dyn Integration> = Arc::new(constructed.map_err(wrap)?);
        integration.initialize().await.map_err(|e| {
            error!("Failed to initialize {}: {}", name, e);
            wrap(e)
        })?;

        let installed = {
            let mut state = self.state.write();
            if taken(&*state) {
                None
            } else {
                state.builtins.insert(name.to_string());
                Some(
                    state
                        .integrations
                        .insert(name.to_string(), Arc::clone(&integration)),
                )
            }
        };

        match installed {
            // Registered by hand while this one was starting
            None => {
                if let Err(e) = integration.close().await {
                    warn!("Failed to close unused {} integration: {}", name, e);
                }
                Err(wrap(Error::DuplicateIntegration(name.to_string())))
            }
            Some(Some(previous)) => {
                debug!("Replaced built-in integration {}", name);
                if let Err(e) = previous.close().await {
                    warn!("Failed to close previous {} integration: {}", name, e);
                }
                Ok(())
            }
            Some(None) => Ok(()),
        }
    }

    /// Add an integration. Names must be unique.
    pub fn register_integration(&self, integration: Arc<dyn Integration>) -> Result<()> {
        let name = integration.name().to_string();
        let mut state = self.state.write();
        if state.integrations.contains_key(&name) {
            return Err(Error::DuplicateIntegration(name));
        }
        debug!("Registered integration {}", name);
        state.integrations.insert(name, integration);
        Ok(())
    }

    pub fn get_integration(&self, name: &str) -> Result<Arc<dyn Integration>> {
        self.state
            .read()
            .integrations
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IntegrationNotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn integration_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().integrations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Enabled integrations, sorted by name.
    pub fn get_enabled_integrations(&self) -> Vec<Arc<dyn Integration>> {
        let mut enabled: Vec<Arc<dyn Integration>> = self
            .state
            .read()
            .integrations
            .values()
            .filter(|i| i.is_enabled())
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.name().cmp(b.name()));
        enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    fn dispatch_ready(&self) -> bool {
        self.config.enabled && self.is_initialized()
    }

    /// Send an analysis snapshot to every enabled integration concurrently.
    pub async fn send_to_all(&self, result: &AnalysisResult) -> Result<()> {
        if !self.dispatch_ready() {
            return Ok(());
        }
        let targets = self.get_enabled_integrations();
        if targets.is_empty() {
            return Ok(());
        }

        let result = Arc::new(result.clone());
        let handles = targets
            .into_iter()
            .map(|integration| {
                let name = integration.name().to_string();
                let result = Arc::clone(&result);
                let cancel = self.cancel.clone();
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        outcome = integration.send_metrics(&result) => outcome,
                    }
                });
                (name, handle)
            })
            .collect();

        join_fan_out("send_metrics", handles).await
    }

    /// Write log entries to every enabled logs-capable integration
    /// concurrently.
    pub async fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() || !self.dispatch_ready() {
            return Ok(());
        }
        let targets: Vec<_> = self
            .get_enabled_integrations()
            .into_iter()
            .filter(|i| i.as_logs().is_some())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let entries: Arc<[LogEntry]> = Arc::from(entries.to_vec());
        let handles = targets
            .into_iter()
            .map(|integration| {
                let name = integration.name().to_string();
                let entries = Arc::clone(&entries);
                let cancel = self.cancel.clone();
                let handle = tokio::spawn(async move {
                    let Some(logs) = integration.as_logs() else {
                        return Ok(());
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        outcome = logs.write_logs(&entries) => outcome,
                    }
                });
                (name, handle)
            })
            .collect();

        join_fan_out("write_logs", handles).await
    }

    /// Probe every enabled integration in turn.
    pub async fn test_all(&self) -> BTreeMap<String, Result<()>> {
        let mut results = BTreeMap::new();
        for integration in self.get_enabled_integrations() {
            let outcome = integration.test_connection().await;
            if let Err(e) = &outcome {
                warn!("Connection test for {} failed: {}", integration.name(), e);
            }
            results.insert(integration.name().to_string(), outcome);
        }
        results
    }

    /// Status snapshot of every registered integration.
    pub fn get_status(&self) -> BTreeMap<String, IntegrationStatus> {
        self.state
            .read()
            .integrations
            .iter()
            .map(|(name, integration)| (name.clone(), integration.status()))
            .collect()
    }

    /// Close every integration in turn. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let integrations: Vec<Arc<dyn Integration>> = {
            let state = self.state.read();
            if !state.initialized {
                return Ok(());
            }
            state.integrations.values().cloned().collect()
        };

        let mut failures = Vec::new();
        for integration in integrations {
            if let Err(e) = integration.close().await {
                failures.push(IntegrationFailure {
                    integration: integration.name().to_string(),
                    error: e,
                });
            }
        }

        self.state.write().initialized = false;

        if failures.is_empty() {
            info!("Integration manager closed");
            return Ok(());
        }
        failures.sort_by(|a, b| a.integration.cmp(&b.integration));
        error!("{} integration(s) failed to close", failures.len());
        Err(Error::Integrations(failures))
    }
}

/// Join every task, collecting failures by integration name.
async fn join_fan_out(
    operation: &str,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
) -> Result<()> {
    let total = handles.len();
    let mut failures = Vec::new();

    for (integration, handle) in handles {
        let error = match handle.await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(join) => Error::Internal(format!("{} task failed: {}", operation, join)),
        };
        failures.push(IntegrationFailure { integration, error });
    }

    if failures.is_empty() {
        debug!("{} delivered to {} integration(s)", operation, total);
        return Ok(());
    }

    failures.sort_by(|a, b| a.integration.cmp(&b.integration));
    error!(
        "{} failed for {} of {} integration(s)",
        operation,
        failures.len(),
        total
    );
    Err(Error::Integrations(failures))
}
