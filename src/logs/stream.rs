//! Log stream grouping
//!
//! Converts log entries into Loki streams. Entries that end up with the same
//! effective label set share one stream; the stream key is the label set
//! rendered with sorted keys, so grouping never depends on insertion order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::models::LogEntry;

/// Dynamic label derived from the entry's level.
pub const LEVEL_LABEL: &str = "level";
/// Dynamic label derived from the entry's component.
pub const COMPONENT_LABEL: &str = "component";

/// A batch of log lines sharing one label set, in Loki push format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStream {
    #[serde(rename = "stream")]
    pub labels: BTreeMap<String, String>,
    /// `[nanosecond timestamp, line]` pairs, oldest first
    pub values: Vec<(String, String)>,
}

impl LogStream {
    /// Canonical key of this stream's label set.
    pub fn key(&self) -> String {
        label_key(&self.labels)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Render a label set as `{a="1", b="2"}` with sorted keys.
pub fn label_key(labels: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Effective labels of an entry.
///
/// Precedence, lowest first: static labels, entry labels, then the dynamic
/// labels named in `dynamic_labels`.
pub fn effective_labels(
    entry: &LogEntry,
    static_labels: &BTreeMap<String, String>,
    dynamic_labels: &[String],
) -> BTreeMap<String, String> {
    let mut labels = static_labels.clone();
    labels.extend(entry.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

    for name in dynamic_labels {
        match name.as_str() {
            LEVEL_LABEL => {
                labels.insert(LEVEL_LABEL.to_string(), entry.level.as_str().to_string());
            }
            COMPONENT_LABEL if !entry.component.is_empty() => {
                labels.insert(COMPONENT_LABEL.to_string(), entry.component.clone());
            }
            _ => {}
        }
    }

    labels
}

/// Render the line pushed for an entry: the message followed by its fields
/// as sorted `key=value` pairs.
pub fn format_line(entry: &LogEntry) -> String {
    let mut line = entry.message.clone();
    for (key, value) in &entry.fields {
        let rendered = match value {
            serde_json::Value::String(s) if !s.is_empty() && !s.contains(char::is_whitespace) => {
                s.clone()
            }
            other => other.to_string(),
        };
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&rendered);
    }
    line
}

fn timestamp_nanos(entry: &LogEntry) -> i64 {
    entry
        .timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| entry.timestamp.timestamp().saturating_mul(1_000_000_000))
}

/// Group entries into streams keyed by their effective label sets.
///
/// Streams come back sorted by key; values inside a stream are sorted by
/// timestamp.
pub fn build_streams(
    entries: &[LogEntry],
    static_labels: &BTreeMap<String, String>,
    dynamic_labels: &[String],
) -> Vec<LogStream> {
    let mut grouped: BTreeMap<String, (BTreeMap<String, String>, Vec<(i64, String)>)> =
        BTreeMap::new();

    for entry in entries {
        let labels = effective_labels(entry, static_labels, dynamic_labels);
        let key = label_key(&labels);
        grouped
            .entry(key)
            .or_insert_with(|| (labels, Vec::new()))
            .1
            .push((timestamp_nanos(entry), format_line(entry)));
    }

    grouped
        .into_values()
        .map(|(labels, mut values)| {
            values.sort();
            LogStream {
                labels,
                values: values
                    .into_iter()
                    .map(|(ts, line)| (ts.to_string(), line))
                    .collect(),
            }
        })
        .collect()
}
