//! Domain value objects shared by the manager, the backends and the batcher.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// =============================================================================
// Integration Status
// =============================================================================

/// Connection and health snapshot of one integration.
///
/// Owned by its backend and handed out as a clone, so a caller's snapshot
/// never changes after it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStatus {
    pub name: String,
    pub enabled: bool,
    pub connected: bool,
    pub last_connect_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl IntegrationStatus {
    /// Fresh status for a backend that has not connected yet.
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            connected: false,
            last_connect_time: None,
            last_error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Record a successful handshake.
    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.last_connect_time = Some(Utc::now());
        self.last_error = None;
    }

    /// Record a failed handshake or push.
    pub fn mark_error(&mut self, error: &Error) {
        self.connected = false;
        self.last_error = Some(error.to_string());
    }
}

// =============================================================================
// Log Entries
// =============================================================================

/// Severity of a log entry, ordered `Debug < Info < Warn < Error`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "WARNING")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(Error::Config(format!("unknown log level: {}", other))),
        }
    }
}

/// A single log record produced by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            component: String::new(),
            labels: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Analysis Payload
// =============================================================================

/// Per-client aggregate inside an analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub requests: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
}

/// Aggregate produced by the upstream analyzer.
///
/// Only the scalar aggregates and the per-client map are consumed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analyzed_at: DateTime<Utc>,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_errors: u64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub avg_response_ms: f64,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub clients: BTreeMap<String, ClientSummary>,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            analyzed_at: Utc::now(),
            total_requests: 0,
            total_errors: 0,
            error_rate: 0.0,
            avg_response_ms: 0.0,
            duration_seconds: 0.0,
            clients: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Metric Model
// =============================================================================

/// Concrete kind of a registered metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
            MetricKind::Summary => write!(f, "summary"),
        }
    }
}

/// Immutable description of a registered metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
}

/// Loosely typed value accepted by ad hoc metric pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Normalise to `f64`. `Text` must hold a float literal.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(v) => Some(*v),
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Float(v as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" ERROR ".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_serde() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"WARN\"");
        let level: LogLevel = serde_json::from_str("\"WARNING\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
    }

    #[test]
    fn test_status_transitions() {
        let mut status = IntegrationStatus::new("loki", true);
        assert!(!status.connected);

        status.mark_error(&Error::Internal("down".into()));
        assert_eq!(status.last_error.as_deref(), Some("Internal error: down"));

        status.mark_connected();
        assert!(status.connected);
        assert!(status.last_connect_time.is_some());
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Error, "upstream timeout")
            .with_component("proxy")
            .with_label("client", "acme")
            .with_field("status", 504);

        assert_eq!(entry.component, "proxy");
        assert_eq!(entry.labels.get("client").map(String::as_str), Some("acme"));
        assert_eq!(entry.fields.get("status"), Some(&serde_json::json!(504)));
    }

    #[test]
    fn test_log_entry_deserialize_defaults() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","level":"INFO","message":"hi"}"#;
        let entry: LogEntry = serde_json::from_str(json).unwrap();
        assert!(entry.component.is_empty());
        assert!(entry.labels.is_empty());
    }

    #[test]
    fn test_metric_value_normalisation() {
        assert_eq!(MetricValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(MetricValue::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(MetricValue::from("42.5").as_f64(), Some(42.5));
        assert_eq!(MetricValue::from("n/a").as_f64(), None);
    }

    #[test]
    fn test_metric_value_untagged_deserialize() {
        let values: BTreeMap<String, MetricValue> =
            serde_json::from_str(r#"{"a": 1, "b": 2.5, "c": "3"}"#).unwrap();
        assert_eq!(values["a"], MetricValue::Int(1));
        assert_eq!(values["b"], MetricValue::Float(2.5));
        assert_eq!(values["c"], MetricValue::Text("3".into()));
    }
}
