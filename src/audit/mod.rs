//! Security audit trail.
//!
//! Rejections are recorded as [`AuditEntry`] values in a bounded in-memory
//! queue. Recording never blocks on I/O: when the queue is full the oldest
//! entry is dropped and counted. A background task started with
//! [`spawn_flusher`] periodically drains the queue into an [`AuditSink`] on
//! the blocking thread pool, and flushes once more when shut down.
//!
//! Raw input is never stored verbatim. [`redact`] masks credential-looking
//! tokens, escapes control characters and truncates the excerpt.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::error::Result;
use crate::security::{DetectedThreat, ThreatCategory};

lazy_static! {
    static ref SECRET_PATTERNS: Vec<Regex> = [
        r"(?i)\b(password|passwd|pwd|token|secret|api[_-]?key|authorization)\s*[=:]\s*\S+",
        r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]+=*",
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        r"\b[A-Fa-f0-9]{32,}\b",
        r"\b[A-Za-z0-9+/_-]{40,}={0,2}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect();
}

/// Placeholder for masked tokens
pub const REDACTED: &str = "[REDACTED]";

/// Kind of event an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    /// A threat signature pushed the score over the threshold
    SecurityViolation,
    /// Evaluation ran out of time
    Timeout,
    /// A field failed validation (suspicious, not necessarily hostile)
    ValidationFailure,
}

impl std::fmt::Display for AuditReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditReason::SecurityViolation => "security_violation",
            AuditReason::Timeout => "timeout",
            AuditReason::ValidationFailure => "validation_failure",
        };
        f.write_str(name)
    }
}

/// One audit record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Entry id
    pub id: Uuid,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Originating field
    pub field: String,
    /// Matched signature (for validation failures, the rule kind)
    pub signature: String,
    /// Threat category, if a signature matched
    pub category: Option<ThreatCategory>,
    /// Aggregate risk score at rejection
    pub risk_score: f32,
    /// Redacted, truncated excerpt of the raw value
    pub excerpt: String,
    /// Event kind
    pub reason: AuditReason,
    /// Human-readable detail
    pub detail: String,
}

impl AuditEntry {
    /// Entry for a detected threat
    pub fn threat(threat: &DetectedThreat, risk_score: f32, raw: &str, excerpt_len: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            field: threat.field.clone(),
            signature: threat.name.to_string(),
            category: Some(threat.category),
            risk_score,
            excerpt: redact(raw, excerpt_len),
            reason: AuditReason::SecurityViolation,
            detail: threat.description.to_string(),
        }
    }

    /// Entry for an event without a matched signature
    pub fn event(
        reason: AuditReason,
        field: &str,
        signature: &str,
        raw: &str,
        excerpt_len: usize,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            field: field.to_string(),
            signature: signature.to_string(),
            category: None,
            risk_score: 0.0,
            excerpt: redact(raw, excerpt_len),
            reason,
            detail: detail.into(),
        }
    }
}

/// Mask secrets, escape control characters and truncate to `max_chars`.
pub fn redact(raw: &str, max_chars: usize) -> String {
    let mut masked = raw.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        masked = pattern.replace_all(&masked, REDACTED).into_owned();
    }

    let mut out = String::new();
    let mut chars = masked.chars();
    for c in chars.by_ref().take(max_chars) {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}

/// Destination for flushed audit entries
pub trait AuditSink: Send + Sync {
    /// Write a batch of entries
    fn write(&self, entries: &[AuditEntry]) -> Result<()>;
}

/// Emits each entry as a `tracing` warning
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn write(&self, entries: &[AuditEntry]) -> Result<()> {
        for entry in entries {
            tracing::warn!(
                target: "frameguard::audit",
                id = %entry.id,
                field = %entry.field,
                signature = %entry.signature,
                reason = %entry.reason,
                risk_score = entry.risk_score,
                excerpt = %entry.excerpt,
                "{}",
                entry.detail
            );
        }
        Ok(())
    }
}

/// Appends entries as JSON lines to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open (or create) the log file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesSink {
    fn write(&self, entries: &[AuditEntry]) -> Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            serde_json::to_writer(&mut *file, entry)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(())
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemorySink {
    /// Create empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries written
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn write(&self, entries: &[AuditEntry]) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(entries);
        Ok(())
    }
}

/// Bounded, drop-oldest audit queue
#[derive(Debug)]
pub struct AuditLog {
    queue: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    excerpt_len: usize,
    recorded: AtomicU64,
    dropped: AtomicU64,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}

impl AuditLog {
    /// Create queue with the given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Self::default()
        }
    }

    /// Create queue from audit configuration
    pub fn from_config(config: &AuditConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            excerpt_len: config.excerpt_len,
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Excerpt length entries should be built with
    pub fn excerpt_len(&self) -> usize {
        self.excerpt_len
    }

    /// Enqueue an entry; drops the oldest one if the queue is full
    pub fn record(&self, entry: AuditEntry) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.capacity {
            if let Some(evicted) = queue.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    id = %evicted.id,
                    capacity = self.capacity,
                    "Audit queue full, dropping oldest entry"
                );
            }
        }
        queue.push_back(entry);
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Take every queued entry
    pub fn drain(&self) -> Vec<AuditEntry> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }

    /// Drain into a sink; returns the number of entries written. Entries the
    /// sink fails to accept are counted as dropped.
    pub fn flush(&self, sink: &dyn AuditSink) -> usize {
        let batch = self.drain();
        if batch.is_empty() {
            return 0;
        }
        match sink.write(&batch) {
            Ok(()) => batch.len(),
            Err(e) => {
                self.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::warn!(error = %e, lost = batch.len(), "Audit sink write failed");
                0
            },
        }
    }

    /// Entries currently queued
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries recorded since start
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Entries lost to overflow or sink failures
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to a running audit flusher
#[derive(Debug)]
pub struct AuditFlusher {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl AuditFlusher {
    /// Stop the task after a final flush of whatever is still queued
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Audit flusher task failed");
        }
    }

    /// Stop immediately; queued entries stay in the log
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Drain `log` into `sink` every `interval` until shut down.
///
/// Sink writes run on tokio's blocking pool. Dropping the returned handle
/// also stops the task after a final flush. Must be called from within a
/// tokio runtime.
pub fn spawn_flusher(
    log: Arc<AuditLog>,
    sink: Arc<dyn AuditSink>,
    interval: Duration,
) -> AuditFlusher {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let stopping = tokio::select! {
                _ = ticker.tick() => false,
                _ = shutdown_rx.recv() => true,
            };
            flush_blocking(&log, &sink).await;
            if stopping {
                tracing::debug!("Audit flusher stopped");
                break;
            }
        }
    });
    AuditFlusher {
        shutdown_tx,
        handle,
    }
}

async fn flush_blocking(log: &Arc<AuditLog>, sink: &Arc<dyn AuditSink>) {
    let log = Arc::clone(log);
    let sink = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || log.flush(sink.as_ref())).await {
        Ok(0) => {},
        Ok(written) => tracing::debug!(written, "Flushed audit entries"),
        Err(e) => tracing::warn!(error = %e, "Audit flush task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;

    fn entry(field: &str) -> AuditEntry {
        AuditEntry::event(
            AuditReason::ValidationFailure,
            field,
            "pattern",
            "abc-123",
            64,
            "expected uppercase",
        )
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn write(&self, _entries: &[AuditEntry]) -> Result<()> {
            Err(GuardError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    #[test]
    fn test_redact_masks_and_truncates() {
        assert_eq!(redact("password=hunter2 and more", 64), "[REDACTED] and more");
        assert_eq!(redact("mail bob@example.com", 64), "mail [REDACTED]");
        assert_eq!(redact("abcdefghij", 4), "abcd...");
        assert_eq!(redact("a\u{0}b", 64), "a\\u{0}b");
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let log = AuditLog::new(2);
        log.record(entry("a"));
        log.record(entry("b"));
        log.record(entry("c"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.recorded(), 3);
        let fields: Vec<_> = log.drain().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["b", "c"]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_flush_to_memory() {
        let log = AuditLog::default();
        let sink = MemorySink::new();
        log.record(entry("sku"));
        assert_eq!(log.flush(&sink), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(log.flush(&sink), 0);
    }

    #[test]
    fn test_failed_sink_counts_dropped() {
        let log = AuditLog::default();
        log.record(entry("sku"));
        log.record(entry("brand"));
        assert_eq!(log.flush(&FailingSink), 0);
        assert_eq!(log.dropped(), 2);
    }

    #[test]
    fn test_json_lines_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.write(&[entry("sku"), entry("brand")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["field"], "sku");
        assert_eq!(lines[1]["reason"], "validation_failure");
    }

    #[tokio::test]
    async fn test_flusher_drains_queue() {
        let log = Arc::new(AuditLog::default());
        let sink = Arc::new(MemorySink::new());
        log.record(entry("face_shape"));

        let flusher = spawn_flusher(log.clone(), sink.clone(), Duration::from_millis(10));
        for _ in 0..50 {
            if !sink.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        flusher.shutdown().await;

        assert_eq!(sink.len(), 1);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_flusher_final_flush_on_shutdown() {
        let log = Arc::new(AuditLog::default());
        let sink = Arc::new(MemorySink::new());

        let flusher = spawn_flusher(log.clone(), sink.clone(), Duration::from_secs(3600));
        // Let the immediate first tick pass
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.record(entry("sku"));
        log.record(entry("brand"));
        assert!(sink.is_empty());

        flusher.shutdown().await;
        assert_eq!(sink.len(), 2);
        assert!(log.is_empty());
    }
}
