//! Error types for signalmesh

use thiserror::Error;

use crate::domain::models::MetricKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// One backend's failure inside a fan-out operation
#[derive(Debug)]
pub struct IntegrationFailure {
    /// Name of the integration that failed
    pub integration: String,
    /// The error it returned
    pub error: Error,
}

impl std::fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.integration, self.error)
    }
}

/// Errors that can occur in signalmesh
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Connection / Transport Errors
    // =========================================================================
    /// Backend handshake or health probe failed
    #[error("Connection to {integration} failed: {reason}")]
    Connection { integration: String, reason: String },

    /// Wire push or API call rejected by a backend
    #[error("Transport error from {integration}: {reason}")]
    Transport { integration: String, reason: String },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Lookup / Registration Errors
    // =========================================================================
    /// Metric not registered
    #[error("Metric not found: {0}")]
    MetricNotFound(String),

    /// Integration not registered with the manager
    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    /// Metric name already registered
    #[error("Metric already registered: {0}")]
    AlreadyRegistered(String),

    /// Integration name collides with a registered one
    #[error("Integration already registered: {0}")]
    DuplicateIntegration(String),

    // =========================================================================
    // Metric Operation Errors
    // =========================================================================
    /// Operation requires a different metric kind
    #[error("Metric {name} is a {actual}, expected {expected}")]
    WrongKind {
        name: String,
        expected: MetricKind,
        actual: MetricKind,
    },

    /// Operation cannot be applied to this metric kind
    #[error("Operation '{operation}' is not supported for {kind} metric {name}")]
    UnsupportedOperation {
        name: String,
        kind: MetricKind,
        operation: &'static str,
    },

    /// Non-numeric value pushed as a metric
    #[error("Value for metric {name} is not numeric: {value}")]
    Type { name: String, value: String },

    /// Value rejected for this metric (negative counter delta, NaN)
    #[error("Invalid value for metric {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    /// Labels do not match the metric's label names
    #[error("Invalid labels for metric {name}: {reason}")]
    InvalidLabels { name: String, reason: String },

    /// Prometheus client library error
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    // =========================================================================
    // Aggregate Errors
    // =========================================================================
    /// One or more integrations failed during a fan-out
    #[error("{} integration(s) failed: {}", .0.len(), join_failures(.0))]
    Integrations(Vec<IntegrationFailure>),

    /// One or more log streams failed to push during a flush
    #[error("Failed to push {failed} of {total} log stream(s): {}", .errors.join("; "))]
    Flush {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Integration failed to initialize
    #[error("Failed to initialize {integration}: {source}")]
    Initialization {
        integration: String,
        #[source]
        source: Box<Error>,
    },

    /// Operation cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Names of the failing integrations for an aggregate error, empty otherwise
    pub fn failed_integrations(&self) -> Vec<&str> {
        match self {
            Error::Integrations(failures) => failures
                .iter()
                .map(|f| f.integration.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn join_failures(failures: &[IntegrationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_error_names_every_integration() {
        let err = Error::Integrations(vec![
            IntegrationFailure {
                integration: "loki".into(),
                error: Error::Internal("boom".into()),
            },
            IntegrationFailure {
                integration: "prometheus".into(),
                error: Error::Cancelled,
            },
        ]);

        let msg = err.to_string();
        assert!(msg.starts_with("2 integration(s) failed"));
        assert!(msg.contains("loki: Internal error: boom"));
        assert!(msg.contains("prometheus: Operation cancelled"));
        assert_eq!(err.failed_integrations(), vec!["loki", "prometheus"]);
    }

    #[test]
    fn test_failed_integrations_empty_for_other_variants() {
        assert!(Error::Cancelled.failed_integrations().is_empty());
    }

    #[test]
    fn test_wrong_kind_display() {
        let err = Error::WrongKind {
            name: "queue_depth".into(),
            expected: MetricKind::Counter,
            actual: MetricKind::Gauge,
        };
        assert_eq!(
            err.to_string(),
            "Metric queue_depth is a gauge, expected counter"
        );
    }

    #[test]
    fn test_flush_error_display() {
        let err = Error::Flush {
            failed: 1,
            total: 3,
            errors: vec!["stream {level=\"ERROR\"}: 500".into()],
        };
        assert!(err.to_string().starts_with("Failed to push 1 of 3 log stream(s)"));
    }
}
