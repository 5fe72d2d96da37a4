//! signalmesh CLI
//!
//! Thin command-line front end over [`IntegrationManager`].
//!
//! ```text
//! signalmesh --config integrations.yaml status
//! signalmesh --config integrations.yaml test
//! signalmesh --config integrations.yaml send-logs entries.jsonl
//! signalmesh --config integrations.yaml send-metrics analysis.json
//! signalmesh --config integrations.yaml serve-metrics --addr 0.0.0.0:9464
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signalmesh::adapters::PrometheusIntegration;
use signalmesh::{
    AnalysisResult, Integration, IntegrationManager, IntegrationsConfig, LogEntry, LogLevel,
    MetricRegistry,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// signalmesh - fan telemetry out to Grafana, Loki and Prometheus
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Integrations configuration file (YAML)
    #[arg(long, env = "SIGNALMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize every enabled integration and print its status
    Status,

    /// Run a connection test against every enabled integration
    Test,

    /// Send log entries from a JSON-lines file
    SendLogs {
        /// One JSON log entry per line
        file: PathBuf,

        /// Drop entries below this level
        #[arg(long, value_parser = parse_level)]
        min_level: Option<LogLevel>,

        /// Push immediately instead of going through the log buffer
        #[arg(long)]
        direct: bool,
    },

    /// Send one analysis snapshot from a JSON file
    SendMetrics {
        file: PathBuf,
    },

    /// Expose the Prometheus integration's registry over HTTP
    ServeMetrics {
        /// Bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9464")]
        addr: SocketAddr,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(args.config.as_deref())?;
    info!("Starting signalmesh");
    info!("  Grafana: {}", config.grafana.enabled);
    info!("  Loki: {}", config.loki.enabled);
    info!("  Prometheus: {}", config.prometheus.enabled);

    match args.command {
        Command::Status => {
            let manager = start_manager(config).await?;
            let status = manager.get_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            close_manager(&manager).await
        }
        Command::Test => {
            let manager = start_manager(config).await?;
            let results = manager.test_all().await;

            let mut failed = 0;
            for (name, outcome) in &results {
                match outcome {
                    Ok(()) => println!("{}: ok", name),
                    Err(e) => {
                        failed += 1;
                        println!("{}: FAILED ({})", name, e);
                    }
                }
            }
            close_manager(&manager).await?;

            if failed > 0 {
                bail!("{} of {} connection test(s) failed", failed, results.len());
            }
            Ok(())
        }
        Command::SendLogs {
            file,
            min_level,
            direct,
        } => {
            let entries = read_log_entries(&file)?;
            let manager = start_manager(config).await?;

            if let Some(level) = min_level {
                for integration in manager.get_enabled_integrations() {
                    if let Some(logs) = integration.as_logs() {
                        logs.set_log_level(level);
                    }
                }
            }

            let sent = if direct {
                send_logs_direct(&manager, &entries).await
            } else {
                manager.send_logs(&entries).await
            };
            if let Err(e) = &sent {
                error!("Failed to send logs: {}", e);
            }

            close_manager(&manager).await?;
            sent?;
            info!("Sent {} log entries", entries.len());
            Ok(())
        }
        Command::SendMetrics { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let result: AnalysisResult = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid analysis result in {}", file.display()))?;

            let manager = start_manager(config).await?;
            let sent = manager.send_to_all(&result).await;
            if let Err(e) = &sent {
                error!("Failed to send metrics: {}", e);
            }
            close_manager(&manager).await?;
            sent?;
            Ok(())
        }
        Command::ServeMetrics { addr } => serve_metrics(config, addr).await,
    }
}

// =============================================================================
// Commands
// =============================================================================

fn parse_level(s: &str) -> std::result::Result<LogLevel, String> {
    s.parse::<LogLevel>().map_err(|e| e.to_string())
}

fn load_config(path: Option<&Path>) -> Result<IntegrationsConfig> {
    match path {
        Some(path) => IntegrationsConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            warn!("No configuration file given, every integration is disabled");
            Ok(IntegrationsConfig::default())
        }
    }
}

async fn start_manager(config: IntegrationsConfig) -> Result<IntegrationManager> {
    let manager = IntegrationManager::new(config);
    manager
        .initialize()
        .await
        .context("Failed to initialize integrations")?;
    Ok(manager)
}

async fn close_manager(manager: &IntegrationManager) -> Result<()> {
    manager
        .close()
        .await
        .context("Failed to close integrations")
}

/// Push entries through each integration's unbuffered path.
async fn send_logs_direct(
    manager: &IntegrationManager,
    entries: &[LogEntry],
) -> signalmesh::Result<()> {
    for integration in manager.get_enabled_integrations() {
        integration.send_logs(entries).await?;
    }
    Ok(())
}

fn read_log_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<LogEntry>(line)
                .with_context(|| format!("{}:{}: invalid log entry", path.display(), i + 1))
        })
        .collect()
}

async fn serve_metrics(config: IntegrationsConfig, addr: SocketAddr) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    serve_until(config, addr, shutdown).await.map(|_| ())
}

/// Serve the registry until `shutdown` fires or the server stops, then close
/// every integration. Returns the closed Prometheus integration.
async fn serve_until(
    mut config: IntegrationsConfig,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<Arc<PrometheusIntegration>> {
    let mut prometheus_config = config.prometheus.clone();
    prometheus_config.enabled = true;
    config.prometheus.enabled = false;

    let prometheus = Arc::new(PrometheusIntegration::new(prometheus_config)?);
    let registry = prometheus.registry();

    let manager = start_manager(config).await?;
    if let Err(e) = prometheus.initialize().await {
        warn!("Prometheus server unreachable, serving local registry only: {}", e);
    }
    manager.register_integration(prometheus.clone())?;

    let mut server = tokio::spawn(run_metrics_server(addr, registry, shutdown.clone()));
    let finished = tokio::select! {
        joined = &mut server => Some(joined),
        _ = shutdown.cancelled() => None,
    };
    let served = match finished {
        Some(joined) => joined,
        None => server.await,
    }
    .context("Metrics server task failed")?;

    // The manager skips integrations when it never initialized
    let closed = close_manager(&manager).await;
    prometheus
        .close()
        .await
        .context("Failed to close Prometheus integration")?;
    closed?;
    served?;
    Ok(prometheus)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    registry: Arc<MetricRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted.context("Metrics server accept error")?,
        };

        let io = TokioIo::new(stream);
        let registry = Arc::clone(&registry);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, std::convert::Infallible>(metrics_response(&req, &registry))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

fn metrics_response(
    req: &hyper::Request<hyper::body::Incoming>,
    registry: &MetricRegistry,
) -> hyper::Response<http_body_util::Full<bytes::Bytes>> {
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Response, StatusCode};

    let (status, content_type, body) = match req.uri().path() {
        "/metrics" => match registry.render() {
            Ok(text) => (StatusCode::OK, prometheus::TEXT_FORMAT, text),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                e.to_string(),
            ),
        },
        "/healthz" | "/livez" => (StatusCode::OK, "text/plain", "ok".to_string()),
        _ => (StatusCode::NOT_FOUND, "text/plain", "not found".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_prometheus(mut config: IntegrationsConfig) -> IntegrationsConfig {
        config.prometheus.url = "http://127.0.0.1:1".to_string();
        config.prometheus.timeout = "1s".to_string();
        config
    }

    #[tokio::test]
    async fn test_serve_closes_prometheus_when_integrations_disabled() {
        let config = unreachable_prometheus(IntegrationsConfig {
            enabled: false,
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let prometheus = serve_until(config, ([127, 0, 0, 1], 0).into(), shutdown)
            .await
            .unwrap();
        assert!(prometheus.is_closed());
    }

    #[tokio::test]
    async fn test_serve_closes_prometheus_when_integrations_enabled() {
        let config = unreachable_prometheus(IntegrationsConfig::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let prometheus = serve_until(config, ([127, 0, 0, 1], 0).into(), shutdown)
            .await
            .unwrap();
        assert!(prometheus.is_closed());
    }
}
