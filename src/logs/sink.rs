//! Log Sinks
//!
//! Destinations a [`LogBatcher`](super::LogBatcher) pushes streams to. Each
//! call to [`LogSink::push`] carries exactly one stream.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::stream::LogStream;
use crate::error::{Error, Result};

/// Path of the Loki push endpoint.
pub const LOKI_PUSH_PATH: &str = "/loki/api/v1/push";

/// Destination for grouped log streams.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Push one stream as a single wire batch.
    async fn push(&self, stream: &LogStream) -> Result<()>;
}

// =============================================================================
// Loki HTTP Sink
// =============================================================================

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: [&'a LogStream; 1],
}

/// Pushes streams to Loki's HTTP push API.
pub struct LokiPushSink {
    client: Client,
    push_url: String,
    tenant_id: Option<String>,
    basic_auth: Option<(String, Option<String>)>,
}

impl std::fmt::Debug for LokiPushSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiPushSink")
            .field("push_url", &self.push_url)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl LokiPushSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            push_url: format!("{}{}", base_url.trim_end_matches('/'), LOKI_PUSH_PATH),
            tenant_id: None,
            basic_auth: None,
        })
    }

    /// Send `X-Scope-OrgID` with every push.
    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id.filter(|t| !t.is_empty());
        self
    }

    pub fn with_basic_auth(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.basic_auth = username.filter(|u| !u.is_empty()).map(|u| (u, password));
        self
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }
}

#[async_trait]
impl LogSink for LokiPushSink {
    #[instrument(skip(self, stream), fields(stream = %stream.key(), lines = stream.len()))]
    async fn push(&self, stream: &LogStream) -> Result<()> {
        let body = PushRequest { streams: [stream] };

        let mut request = self.client.post(&self.push_url).json(&body);
        if let Some(tenant) = &self.tenant_id {
            request = request.header("X-Scope-OrgID", tenant);
        }
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await.map_err(|e| Error::Transport {
            integration: "loki".to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport {
                integration: "loki".to_string(),
                reason: format!("push returned {}: {}", status, text.trim()),
            });
        }

        debug!("Pushed {} line(s) to Loki", stream.len());
        Ok(())
    }
}

// =============================================================================
// In-Memory Sink
// =============================================================================

/// Collects pushed streams in memory.
///
/// Streams carrying the label pair set with [`fail_on_label`] are rejected,
/// which lets tests exercise partial push failures.
///
/// [`fail_on_label`]: InMemoryLogSink::fail_on_label
#[derive(Debug, Default)]
pub struct InMemoryLogSink {
    streams: RwLock<Vec<LogStream>>,
    fail_on: RwLock<Option<(String, String)>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject streams whose labels contain `key=value`.
    pub fn fail_on_label(&self, key: impl Into<String>, value: impl Into<String>) {
        *self.fail_on.write() = Some((key.into(), value.into()));
    }

    /// All accepted streams, in push order.
    pub fn streams(&self) -> Vec<LogStream> {
        self.streams.read().clone()
    }

    /// Number of accepted pushes.
    pub fn push_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Total lines across accepted pushes.
    pub fn line_count(&self) -> usize {
        self.streams.read().iter().map(LogStream::len).sum()
    }

    pub fn clear(&self) {
        self.streams.write().clear();
    }
}

#[async_trait]
impl LogSink for InMemoryLogSink {
    async fn push(&self, stream: &LogStream) -> Result<()> {
        if let Some((key, value)) = self.fail_on.read().as_ref() {
            if stream.labels.get(key) == Some(value) {
                return Err(Error::Transport {
                    integration: "memory".to_string(),
                    reason: format!("rejected stream {}", stream.key()),
                });
            }
        }
        self.streams.write().push(stream.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LogEntry, LogLevel};
    use crate::logs::stream::build_streams;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stream(level: LogLevel, message: &str) -> LogStream {
        let entry = LogEntry::new(level, message)
            .with_timestamp(chrono::DateTime::from_timestamp(10, 0).unwrap());
        build_streams(&[entry], &BTreeMap::new(), &["level".to_string()]).remove(0)
    }

    #[tokio::test]
    async fn test_in_memory_sink_collects() {
        let sink = InMemoryLogSink::new();
        sink.push(&stream(LogLevel::Info, "one")).await.unwrap();
        sink.push(&stream(LogLevel::Warn, "two")).await.unwrap();

        assert_eq!(sink.push_count(), 2);
        assert_eq!(sink.line_count(), 2);
        sink.clear();
        assert_eq!(sink.push_count(), 0);
    }

    #[tokio::test]
    async fn test_in_memory_sink_rejects_marked_streams() {
        let sink = InMemoryLogSink::new();
        sink.fail_on_label("level", "ERROR");

        assert!(sink.push(&stream(LogLevel::Error, "bad")).await.is_err());
        assert!(sink.push(&stream(LogLevel::Info, "good")).await.is_ok());
        assert_eq!(sink.push_count(), 1);
    }

    #[tokio::test]
    async fn test_loki_sink_push_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOKI_PUSH_PATH))
            .and(header("X-Scope-OrgID", "tenant-a"))
            .and(body_json(serde_json::json!({
                "streams": [{
                    "stream": {"level": "INFO"},
                    "values": [["10000000000", "ready"]]
                }]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = LokiPushSink::new(&server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_tenant(Some("tenant-a".to_string()));

        sink.push(&stream(LogLevel::Info, "ready")).await.unwrap();
    }

    #[tokio::test]
    async fn test_loki_sink_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOKI_PUSH_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("entry out of order"))
            .mount(&server)
            .await;

        let sink = LokiPushSink::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = sink.push(&stream(LogLevel::Info, "late")).await.unwrap_err();

        match err {
            Error::Transport { integration, reason } => {
                assert_eq!(integration, "loki");
                assert!(reason.contains("400"));
                assert!(reason.contains("entry out of order"));
            }
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    #[test]
    fn test_push_url_normalised() {
        let sink = LokiPushSink::new("http://loki:3100/", Duration::from_secs(1)).unwrap();
        assert_eq!(sink.push_url(), "http://loki:3100/loki/api/v1/push");
    }
}
