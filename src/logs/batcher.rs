//! Log Batcher
//!
//! Decouples the rate at which log entries are produced from the rate at
//! which they are pushed over the network.
//!
//! # Flush Triggers
//!
//! ```text
//!  write_logs ──▶ [ buffer ≤ capacity ] ──┬── overflow  (synchronous, in write_logs)
//!                                         ├── timer     (background task)
//!                                         ├── shutdown  (background task, final flush)
//!                                         └── flush()   (explicit call)
//! ```
//!
//! Every trigger drains the buffer by swapping it for an empty one under the
//! lock, so writers never wait on network I/O and an entry is pushed by
//! exactly one flush.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::sink::LogSink;
use super::stream::{build_streams, LogStream};
use crate::config::{LokiConfig, DEFAULT_BATCH_INTERVAL};
use crate::domain::models::{LogEntry, LogLevel};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a log batcher
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Maximum buffered entries before a synchronous flush
    pub buffer_size: usize,

    /// Periodic flush interval
    pub flush_interval: Duration,

    /// Entry-derived labels to attach
    pub dynamic_labels: Vec<String>,

    /// Labels attached to every stream
    pub static_labels: BTreeMap<String, String>,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::from(&LokiConfig::default())
    }
}

impl From<&LokiConfig> for BatcherConfig {
    fn from(config: &LokiConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            flush_interval: config.batch_interval(),
            dynamic_labels: config.dynamic_labels.clone(),
            static_labels: config.static_labels.clone(),
        }
    }
}

/// Flush counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    /// Non-empty buffer drains
    pub flush_count: u64,
    /// Entries drained from the buffer
    pub entries_flushed: u64,
    /// Stream pushes that failed
    pub failed_pushes: u64,
    /// Entries dropped by the minimum level filter
    pub dropped_entries: u64,
}

// =============================================================================
// Log Batcher
// =============================================================================

/// Bounded log buffer with timer, overflow and shutdown flushes.
///
/// The background task is spawned by [`start`](LogBatcher::start) and must be
/// stopped with [`close`](LogBatcher::close), which performs the final flush.
pub struct LogBatcher {
    capacity: usize,
    flush_interval: Duration,
    dynamic_labels: Vec<String>,
    static_labels: RwLock<BTreeMap<String, String>>,
    min_level: RwLock<LogLevel>,

    buffer: Mutex<Vec<LogEntry>>,
    sink: Arc<dyn LogSink>,

    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,

    flush_count: AtomicU64,
    entries_flushed: AtomicU64,
    failed_pushes: AtomicU64,
    dropped_entries: AtomicU64,
}

impl std::fmt::Debug for LogBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBatcher")
            .field("capacity", &self.capacity)
            .field("flush_interval", &self.flush_interval)
            .field("buffered", &self.buffered_len())
            .finish()
    }
}

impl LogBatcher {
    /// Create a batcher. A zero `buffer_size` is treated as 1 and a zero
    /// `flush_interval` as [`DEFAULT_BATCH_INTERVAL`].
    pub fn new(config: BatcherConfig, sink: Arc<dyn LogSink>) -> Arc<Self> {
        let capacity = config.buffer_size.max(1);
        let flush_interval = if config.flush_interval.is_zero() {
            warn!(
                "Zero log flush interval, using {:?}",
                DEFAULT_BATCH_INTERVAL
            );
            DEFAULT_BATCH_INTERVAL
        } else {
            config.flush_interval
        };

        Arc::new(Self {
            capacity,
            flush_interval,
            dynamic_labels: config.dynamic_labels,
            static_labels: RwLock::new(config.static_labels),
            min_level: RwLock::new(LogLevel::Debug),
            buffer: Mutex::new(Vec::with_capacity(capacity)),
            sink,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            flush_count: AtomicU64::new(0),
            entries_flushed: AtomicU64::new(0),
            failed_pushes: AtomicU64::new(0),
            dropped_entries: AtomicU64::new(0),
        })
    }

    /// Spawn the background flush task. Only the first call has an effect,
    /// and none after [`close`](LogBatcher::close).
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let batcher = Arc::clone(self);
        *task = Some(tokio::spawn(async move { batcher.run().await }));
        debug!("Started log flush task every {:?}", self.flush_interval);
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Entries currently waiting for a flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            flush_count: self.flush_count.load(Ordering::Relaxed),
            entries_flushed: self.entries_flushed.load(Ordering::Relaxed),
            failed_pushes: self.failed_pushes.load(Ordering::Relaxed),
            dropped_entries: self.dropped_entries.load(Ordering::Relaxed),
        }
    }

    pub fn set_min_level(&self, level: LogLevel) {
        *self.min_level.write() = level;
    }

    pub fn min_level(&self) -> LogLevel {
        *self.min_level.read()
    }

    /// Merge labels into the static label set; later values win.
    pub fn add_static_labels(&self, labels: BTreeMap<String, String>) {
        self.static_labels.write().extend(labels);
    }

    pub fn static_labels(&self) -> BTreeMap<String, String> {
        self.static_labels.read().clone()
    }

    /// Buffer entries, flushing synchronously whenever the buffer is full.
    ///
    /// Overflow flush failures do not stop the remaining entries from being
    /// buffered; they are returned once every entry has been appended. After
    /// [`close`](LogBatcher::close) entries are pushed directly instead.
    pub async fn write_logs(&self, entries: &[LogEntry]) -> Result<()> {
        let min_level = self.min_level();
        let accepted: Vec<&LogEntry> = entries.iter().filter(|e| e.level >= min_level).collect();

        let dropped = entries.len() - accepted.len();
        if dropped > 0 {
            self.dropped_entries
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        if accepted.is_empty() {
            return Ok(());
        }

        // The closed check shares the buffer lock with the shutdown drain, so
        // an entry is either drained by the final flush or pushed here.
        let mut errors = Vec::new();
        for (i, entry) in accepted.iter().enumerate() {
            loop {
                let step = {
                    let mut buffer = self.buffer.lock();
                    if self.shutdown.is_cancelled() {
                        Append::Closed
                    } else if buffer.len() < self.capacity {
                        buffer.push((*entry).clone());
                        Append::Buffered
                    } else {
                        Append::Overflow(std::mem::replace(
                            &mut *buffer,
                            Vec::with_capacity(self.capacity),
                        ))
                    }
                };

                match step {
                    Append::Buffered => break,
                    Append::Overflow(drained) => {
                        debug!("Log buffer full ({}), flushing", drained.len());
                        if let Err(e) = self.flush_entries(drained).await {
                            errors.push(e);
                        }
                    }
                    Append::Closed => {
                        let rest: Vec<LogEntry> =
                            accepted[i..].iter().map(|e| (*e).clone()).collect();
                        debug!("Log batcher closed, pushing {} entries directly", rest.len());
                        if let Err(e) = self.send_logs(&rest).await {
                            errors.push(e);
                        }
                        return merge_flush_errors(errors);
                    }
                }
            }
        }

        merge_flush_errors(errors)
    }

    /// Drain the buffer and push every resulting stream.
    pub async fn flush(&self) -> Result<()> {
        let drained = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::replace(&mut *buffer, Vec::with_capacity(self.capacity))
        };

        self.flush_entries(drained).await
    }

    /// Group and push entries immediately, bypassing the buffer.
    pub async fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let streams = build_streams(entries, &self.static_labels(), &self.dynamic_labels);
        self.push_streams(streams).await
    }

    /// Feed entries from a channel into the buffer until the channel closes
    /// or the batcher shuts down.
    pub async fn stream_logs(&self, mut rx: mpsc::Receiver<LogEntry>) -> Result<()> {
        let mut received = 0u64;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(entry) => {
                        received += 1;
                        if let Err(e) = self.write_logs(std::slice::from_ref(&entry)).await {
                            warn!("Failed to flush streamed logs: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("Log stream ended after {} entries", received);
        Ok(())
    }

    /// Stop the background task after its final flush. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let handle = self.task.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Internal(format!("Log flush task failed: {}", e)))?,
            None => self.flush().await,
        }
    }

    #[instrument(skip(self))]
    async fn run(self: Arc<Self>) -> Result<()> {
        let mut tick = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Log batcher shutting down, flushing {} entries", self.buffered_len());
                    return self.flush().await;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.flush().await {
                        warn!("Periodic log flush failed: {}", e);
                    }
                }
            }
        }
    }

    async fn flush_entries(&self, entries: Vec<LogEntry>) -> Result<()> {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        self.entries_flushed
            .fetch_add(entries.len() as u64, Ordering::Relaxed);

        let streams = build_streams(&entries, &self.static_labels(), &self.dynamic_labels);
        debug!(
            "Flushing {} entries as {} stream(s)",
            entries.len(),
            streams.len()
        );
        self.push_streams(streams).await
    }

    async fn push_streams(&self, streams: Vec<LogStream>) -> Result<()> {
        let total = streams.len();
        let results = join_all(streams.iter().map(|s| self.sink.push(s))).await;

        let errors: Vec<String> = streams
            .iter()
            .zip(results)
            .filter_map(|(stream, result)| {
                result
                    .err()
                    .map(|e| format!("stream {}: {}", stream.key(), e))
            })
            .collect();

        if errors.is_empty() {
            return Ok(());
        }

        self.failed_pushes
            .fetch_add(errors.len() as u64, Ordering::Relaxed);
        Err(Error::Flush {
            failed: errors.len(),
            total,
            errors,
        })
    }
}

enum Append {
    Buffered,
    Overflow(Vec<LogEntry>),
    Closed,
}

/// Fold several flush failures into one error.
fn merge_flush_errors(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => {
            let mut failed = 0;
            let mut total = 0;
            let mut messages = Vec::new();
            for error in errors {
                match error {
                    Error::Flush {
                        failed: f,
                        total: t,
                        errors: e,
                    } => {
                        failed += f;
                        total += t;
                        messages.extend(e);
                    }
                    other => messages.push(other.to_string()),
                }
            }
            Err(Error::Flush {
                failed,
                total,
                errors: messages,
            })
        }
    }
}
