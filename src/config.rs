//! Integration configuration
//!
//! Plain serde structs with defaults for every field, so a partial YAML
//! document only has to name what differs. Durations are strings such as
//! `"500ms"`, `"10s"` or `"1m30s"`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Fallback flush interval when `batch_timeout` cannot be parsed.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// Top-level
// =============================================================================

/// Configuration for every integration the manager knows about
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Master switch; when false the manager does nothing
    pub enabled: bool,
    pub grafana: GrafanaConfig,
    pub loki: LokiConfig,
    pub prometheus: PrometheusConfig,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grafana: GrafanaConfig::default(),
            loki: LokiConfig::default(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

impl IntegrationsConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("invalid YAML: {}", e)))
    }

    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings of every enabled integration.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.grafana.enabled {
            require_url("grafana", &self.grafana.url)?;
            parse_duration(&self.grafana.timeout)?;
        }
        if self.loki.enabled {
            require_url("loki", &self.loki.url)?;
            parse_duration(&self.loki.timeout)?;
            if self.loki.buffer_size == 0 {
                return Err(Error::Config("loki.buffer_size must be greater than 0".into()));
            }
        }
        if self.prometheus.enabled {
            parse_duration(&self.prometheus.timeout)?;
            if self.prometheus.push_gateway.enabled {
                require_url("prometheus.push_gateway", &self.prometheus.push_gateway.url)?;
                if self.prometheus.push_gateway.job.trim().is_empty() {
                    return Err(Error::Config(
                        "prometheus.push_gateway.job must not be empty".into(),
                    ));
                }
            } else if self.prometheus.url.trim().is_empty() {
                return Err(Error::Config(
                    "prometheus needs either url or an enabled push_gateway".into(),
                ));
            }
        }
        Ok(())
    }
}

fn require_url(section: &str, url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Config(format!("{}.url must be set", section)));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!(
            "{}.url must start with http:// or https://: {}",
            section, url
        )));
    }
    Ok(())
}

// =============================================================================
// Grafana
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrafanaConfig {
    pub enabled: bool,
    pub url: String,
    /// Service account token, sent as a bearer token
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub org_id: Option<u64>,
    pub timeout: String,
    /// Create the analysis overview dashboard during initialize
    pub provision_dashboard: bool,
    pub dashboard_folder_uid: Option<String>,
}

impl Default for GrafanaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:3000".to_string(),
            api_key: None,
            username: None,
            password: None,
            org_id: None,
            timeout: "30s".to_string(),
            provision_dashboard: false,
            dashboard_folder_uid: None,
        }
    }
}

impl GrafanaConfig {
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }
}

// =============================================================================
// Loki
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LokiConfig {
    pub enabled: bool,
    pub url: String,
    /// Sent as `X-Scope-OrgID`
    pub tenant_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: String,
    /// Maximum number of buffered entries
    pub buffer_size: usize,
    /// Periodic flush interval
    pub batch_timeout: String,
    /// Entry-derived labels to attach (`level`, `component`)
    pub dynamic_labels: Vec<String>,
    pub static_labels: BTreeMap<String, String>,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:3100".to_string(),
            tenant_id: None,
            username: None,
            password: None,
            timeout: "10s".to_string(),
            buffer_size: 1000,
            batch_timeout: "5s".to_string(),
            dynamic_labels: vec!["level".to_string(), "component".to_string()],
            static_labels: BTreeMap::new(),
        }
    }
}

impl LokiConfig {
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }

    /// Flush interval, falling back to [`DEFAULT_BATCH_INTERVAL`] on bad input.
    pub fn batch_interval(&self) -> Duration {
        match parse_duration(&self.batch_timeout) {
            Ok(interval) => interval,
            Err(e) => {
                warn!(
                    "Invalid loki.batch_timeout {:?} ({}), using {:?}",
                    self.batch_timeout, e, DEFAULT_BATCH_INTERVAL
                );
                DEFAULT_BATCH_INTERVAL
            }
        }
    }
}

// =============================================================================
// Prometheus
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    /// Prometheus server, probed by the connection test
    pub url: String,
    /// Prefix for every registered metric name
    pub namespace: String,
    pub timeout: String,
    /// Constant labels attached to every metric
    pub external_labels: BTreeMap<String, String>,
    pub push_gateway: PushGatewayConfig,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:9090".to_string(),
            namespace: "signalmesh".to_string(),
            timeout: "10s".to_string(),
            external_labels: BTreeMap::new(),
            push_gateway: PushGatewayConfig::default(),
        }
    }
}

impl PrometheusConfig {
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushGatewayConfig {
    pub enabled: bool,
    pub url: String,
    pub job: String,
    pub instance: Option<String>,
}

impl Default for PushGatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:9091".to_string(),
            job: "signalmesh".to_string(),
            instance: None,
        }
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string like "500ms", "30s", "5m", "1h30m" or "1d".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c.to_ascii_lowercase() {
            'm' if chars.peek().map(|n| n.eq_ignore_ascii_case(&'s')) == Some(true) => {
                chars.next();
                1
            }
            'h' => 3_600_000,
            'm' => 60_000,
            's' => 1_000,
            'd' => 86_400_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_ms = num
            .checked_mul(multiplier)
            .and_then(|v| total_ms.checked_add(v))
            .ok_or_else(|| Error::DurationParse(format!("duration overflow: {}", s)))?;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = num
            .checked_mul(1_000)
            .and_then(|v| total_ms.checked_add(v))
            .ok_or_else(|| Error::DurationParse(format!("duration overflow: {}", s)))?;
    }

    if total_ms == 0 {
        return Err(Error::DurationParse(
            "duration must be greater than 0".to_string(),
        ));
    }

    Ok(Duration::from_millis(total_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // parse_duration Tests
    // =========================================================================

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("1MS").unwrap(), Duration::from_millis(1));
    }

    #[test]
    fn test_parse_duration_combined() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("1s250ms").unwrap(),
            Duration::from_millis(1250)
        );
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("s").is_err());
    }

    // =========================================================================
    // Config Tests
    // =========================================================================

    #[test]
    fn test_defaults() {
        let config = IntegrationsConfig::default();
        assert!(config.enabled);
        assert!(!config.grafana.enabled);
        assert!(!config.loki.enabled);
        assert!(!config.prometheus.enabled);
        assert_eq!(config.loki.buffer_size, 1000);
        assert_eq!(config.loki.dynamic_labels, vec!["level", "component"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_interval_fallback() {
        let mut loki = LokiConfig::default();
        assert_eq!(loki.batch_interval(), Duration::from_secs(5));

        loki.batch_timeout = "soon".to_string();
        assert_eq!(loki.batch_interval(), DEFAULT_BATCH_INTERVAL);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
loki:
  enabled: true
  url: http://loki:3100
  buffer_size: 50
  static_labels:
    env: prod
prometheus:
  enabled: true
  push_gateway:
    enabled: true
    url: http://gateway:9091
    job: analyzer
"#;
        let config = IntegrationsConfig::from_yaml_str(yaml).unwrap();
        assert!(config.enabled);
        assert!(config.loki.enabled);
        assert_eq!(config.loki.buffer_size, 50);
        assert_eq!(config.loki.batch_timeout, "5s");
        assert_eq!(config.loki.static_labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(config.prometheus.push_gateway.job, "analyzer");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = IntegrationsConfig::default();
        config.loki.enabled = true;
        config.loki.buffer_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = IntegrationsConfig::default();
        config.grafana.enabled = true;
        config.grafana.url = "grafana:3000".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = IntegrationsConfig::default();
        config.prometheus.enabled = true;
        config.prometheus.timeout = "never".to_string();
        assert!(matches!(config.validate(), Err(Error::DurationParse(_))));
    }

    #[test]
    fn test_validate_skips_when_globally_disabled() {
        let mut config = IntegrationsConfig::default();
        config.enabled = false;
        config.loki.enabled = true;
        config.loki.url = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            IntegrationsConfig::from_yaml_str("loki: [unclosed"),
            Err(Error::Config(_))
        ));
    }
}
