//! Pipeline statistics tracking.
//!
//! Tracks evaluations, outcomes, timeouts and evaluation latencies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// How an evaluation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Passed every stage
    Accepted,
    /// Failed field validation
    RejectedValidation,
    /// Matched threat signatures
    RejectedSecurity,
    /// Ran out of evaluation time (also a security rejection)
    TimedOut,
}

/// Thread-safe pipeline statistics
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Total evaluations
    evaluated: AtomicU64,
    /// Queries accepted
    accepted: AtomicU64,
    /// Rejections by field validation
    rejected_validation: AtomicU64,
    /// Rejections by threat detection (timeouts included)
    rejected_security: AtomicU64,
    /// Evaluations that ran out of time
    timeouts: AtomicU64,
    /// Alterations made by the sanitizer
    alterations: AtomicU64,
    /// Evaluation latencies (for percentile calculation)
    latencies: RwLock<Vec<Duration>>,
    /// Start time
    started_at: RwLock<Option<Instant>>,
}

impl PipelineStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            started_at: RwLock::new(Some(Instant::now())),
            ..Default::default()
        }
    }

    /// Record a finished evaluation
    pub fn record(&self, outcome: Outcome, latency: Duration) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Accepted => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            },
            Outcome::RejectedValidation => {
                self.rejected_validation.fetch_add(1, Ordering::Relaxed);
            },
            Outcome::RejectedSecurity => {
                self.rejected_security.fetch_add(1, Ordering::Relaxed);
            },
            Outcome::TimedOut => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.rejected_security.fetch_add(1, Ordering::Relaxed);
            },
        }

        if let Ok(mut latencies) = self.latencies.write() {
            latencies.push(latency);
            if latencies.len() > LATENCY_WINDOW {
                latencies.remove(0);
            }
        }
    }

    /// Record sanitizer alterations
    pub fn record_alterations(&self, count: usize) {
        self.alterations.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get total evaluations
    pub fn total_evaluated(&self) -> u64 {
        self.evaluated.load(Ordering::Relaxed)
    }

    /// Get accepted count
    pub fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Get validation rejections
    pub fn rejected_validation(&self) -> u64 {
        self.rejected_validation.load(Ordering::Relaxed)
    }

    /// Get security rejections (timeouts included)
    pub fn rejected_security(&self) -> u64 {
        self.rejected_security.load(Ordering::Relaxed)
    }

    /// Get timeouts
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Get sanitizer alterations
    pub fn total_alterations(&self) -> u64 {
        self.alterations.load(Ordering::Relaxed)
    }

    /// Fraction of evaluations rejected (0.0-1.0)
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_evaluated();
        if total == 0 {
            0.0
        } else {
            (self.rejected_validation() + self.rejected_security()) as f64 / total as f64
        }
    }

    /// Get p50 latency
    pub fn p50_latency(&self) -> Option<Duration> {
        self.percentile_latency(50)
    }

    /// Get p95 latency
    pub fn p95_latency(&self) -> Option<Duration> {
        self.percentile_latency(95)
    }

    /// Get p99 latency
    pub fn p99_latency(&self) -> Option<Duration> {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> Option<Duration> {
        let latencies = self.latencies.read().ok()?;
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        Some(sorted[idx])
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.started_at
            .read()
            .ok()
            .and_then(|s| s.map(|start| start.elapsed()))
            .unwrap_or_default()
    }

    /// Get summary as JSON-compatible struct; `audit_dropped` comes from the
    /// audit log, which counts its own losses
    pub fn summary(&self, audit_dropped: u64) -> StatsSummary {
        StatsSummary {
            evaluated: self.total_evaluated(),
            accepted: self.total_accepted(),
            rejected_validation: self.rejected_validation(),
            rejected_security: self.rejected_security(),
            timeouts: self.timeouts(),
            alterations: self.total_alterations(),
            audit_dropped,
            rejection_rate: self.rejection_rate(),
            p50_latency_ms: self.p50_latency().map(|d| d.as_secs_f64() * 1000.0),
            p95_latency_ms: self.p95_latency().map(|d| d.as_secs_f64() * 1000.0),
            p99_latency_ms: self.p99_latency().map(|d| d.as_secs_f64() * 1000.0),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.evaluated.store(0, Ordering::Relaxed);
        self.accepted.store(0, Ordering::Relaxed);
        self.rejected_validation.store(0, Ordering::Relaxed);
        self.rejected_security.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.alterations.store(0, Ordering::Relaxed);

        if let Ok(mut latencies) = self.latencies.write() {
            latencies.clear();
        }

        if let Ok(mut started) = self.started_at.write() {
            *started = Some(Instant::now());
        }
    }
}

/// Statistics summary for serialization.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSummary {
    /// Total evaluations.
    pub evaluated: u64,
    /// Queries accepted.
    pub accepted: u64,
    /// Rejections by field validation.
    pub rejected_validation: u64,
    /// Rejections by threat detection, timeouts included.
    pub rejected_security: u64,
    /// Evaluations that exceeded the time budget.
    pub timeouts: u64,
    /// Alterations made by the sanitizer.
    pub alterations: u64,
    /// Audit entries lost to queue overflow or sink failures.
    pub audit_dropped: u64,
    /// Fraction of evaluations rejected.
    pub rejection_rate: f64,
    /// 50th percentile latency in milliseconds.
    pub p50_latency_ms: Option<f64>,
    /// 95th percentile latency in milliseconds.
    pub p95_latency_ms: Option<f64>,
    /// 99th percentile latency in milliseconds.
    pub p99_latency_ms: Option<f64>,
    /// Uptime in seconds.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counters() {
        let stats = PipelineStats::new();

        stats.record(Outcome::Accepted, Duration::from_micros(200));
        stats.record(Outcome::RejectedValidation, Duration::from_micros(150));
        stats.record(Outcome::RejectedSecurity, Duration::from_micros(300));
        stats.record(Outcome::TimedOut, Duration::from_millis(50));

        assert_eq!(stats.total_evaluated(), 4);
        assert_eq!(stats.total_accepted(), 1);
        assert_eq!(stats.rejected_validation(), 1);
        assert_eq!(stats.rejected_security(), 2);
        assert_eq!(stats.timeouts(), 1);
        assert!((stats.rejection_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_latency_percentiles() {
        let stats = PipelineStats::new();

        for i in 1..=100 {
            stats.record(Outcome::Accepted, Duration::from_millis(i));
        }

        let p50 = stats.p50_latency().unwrap();
        let p95 = stats.p95_latency().unwrap();
        let p99 = stats.p99_latency().unwrap();

        assert!(p50.as_millis() >= 49 && p50.as_millis() <= 51);
        assert!(p95.as_millis() >= 94 && p95.as_millis() <= 96);
        assert!(p99.as_millis() >= 98 && p99.as_millis() <= 100);
    }

    #[test]
    fn test_latency_window_bounded() {
        let stats = PipelineStats::new();
        for _ in 0..(LATENCY_WINDOW + 10) {
            stats.record(Outcome::Accepted, Duration::from_micros(1));
        }
        assert_eq!(stats.latencies.read().unwrap().len(), LATENCY_WINDOW);
    }

    #[test]
    fn test_summary_and_reset() {
        let stats = PipelineStats::new();
        stats.record(Outcome::RejectedSecurity, Duration::from_millis(1));
        stats.record_alterations(3);

        let summary = stats.summary(7);
        assert_eq!(summary.rejected_security, 1);
        assert_eq!(summary.alterations, 3);
        assert_eq!(summary.audit_dropped, 7);

        stats.reset();
        assert_eq!(stats.total_evaluated(), 0);
        assert!(stats.p50_latency().is_none());
    }
}
