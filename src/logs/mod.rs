//! Logs module
//!
//! Buffering, stream grouping and delivery of log entries.
//!
//! ```text
//! LogEntry ──▶ LogBatcher ──▶ build_streams ──▶ LogSink (one push per stream)
//! ```

mod batcher;
mod sink;
pub mod stream;

#[cfg(test)]
mod proptest;

pub use batcher::{BatcherConfig, BatcherStats, LogBatcher};
pub use sink::{InMemoryLogSink, LogSink, LokiPushSink, LOKI_PUSH_PATH};
pub use stream::{build_streams, LogStream};
