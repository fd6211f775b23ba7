//! Run metrics, emitted through an injected sink.
//!
//! Sources and the orchestrator never touch process-wide state directly;
//! they report into a [`MetricsSink`] handed to them at construction. The
//! exporter (Prometheus, StatsD, ...) lives behind an implementation of the
//! trait and is not part of this crate.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::ErrorKind;

/// Final status of one run, used as a counter label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Receiver for run counters and timings. Implementations must tolerate
/// concurrent calls from several sources.
pub trait MetricsSink: Send + Sync {
    fn record_run(&self, source: &str, status: RunStatus) {
        let _ = (source, status);
    }

    fn record_items(&self, source: &str, count: u64) {
        let _ = (source, count);
    }

    fn record_error(&self, source: &str, kind: ErrorKind) {
        let _ = (source, kind);
    }

    fn record_duration(&self, source: &str, duration: Duration) {
        let _ = (source, duration);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Sink that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_run(&self, source: &str, status: RunStatus) {
        tracing::info!(%source, %status, "scraper run");
    }

    fn record_items(&self, source: &str, count: u64) {
        tracing::debug!(%source, count, "items scraped");
    }

    fn record_error(&self, source: &str, kind: ErrorKind) {
        tracing::debug!(%source, %kind, "scraper error");
    }

    fn record_duration(&self, source: &str, duration: Duration) {
        tracing::debug!(%source, duration_ms = %duration.as_millis(), "scraper duration");
    }
}

/// Point-in-time copy of an [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Keyed by `"source/status"`.
    pub runs: BTreeMap<String, u64>,
    pub items: BTreeMap<String, u64>,
    /// Keyed by `"source/kind"`.
    pub errors: BTreeMap<String, u64>,
    /// Every observed duration in milliseconds, per source.
    pub durations_ms: BTreeMap<String, Vec<u64>>,
    pub total_runs: u64,
}

/// Thread-safe in-process counters, suitable for a run summary and for
/// assertions in tests.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    total_runs: AtomicU64,
    runs: Mutex<BTreeMap<(String, RunStatus), u64>>,
    items: Mutex<BTreeMap<String, u64>>,
    errors: Mutex<BTreeMap<(String, ErrorKind), u64>>,
    durations: Mutex<BTreeMap<String, Vec<Duration>>>,
}

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self, source: &str, status: RunStatus) -> u64 {
        locked(&self.runs)
            .get(&(source.to_string(), status))
            .copied()
            .unwrap_or(0)
    }

    pub fn items(&self, source: &str) -> u64 {
        locked(&self.items).get(source).copied().unwrap_or(0)
    }

    pub fn errors(&self, source: &str, kind: ErrorKind) -> u64 {
        locked(&self.errors)
            .get(&(source.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn durations(&self, source: &str) -> Vec<Duration> {
        locked(&self.durations)
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_runs(&self) -> u64 {
        self.total_runs.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs: locked(&self.runs)
                .iter()
                .map(|((s, st), n)| (format!("{s}/{st}"), *n))
                .collect(),
            items: locked(&self.items).clone(),
            errors: locked(&self.errors)
                .iter()
                .map(|((s, k), n)| (format!("{s}/{k}"), *n))
                .collect(),
            durations_ms: locked(&self.durations)
                .iter()
                .map(|(s, ds)| (s.clone(), ds.iter().map(|d| d.as_millis() as u64).collect()))
                .collect(),
            total_runs: self.total_runs(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_run(&self, source: &str, status: RunStatus) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        *locked(&self.runs)
            .entry((source.to_string(), status))
            .or_insert(0) += 1;
    }

    fn record_items(&self, source: &str, count: u64) {
        *locked(&self.items).entry(source.to_string()).or_insert(0) += count;
    }

    fn record_error(&self, source: &str, kind: ErrorKind) {
        *locked(&self.errors)
            .entry((source.to_string(), kind))
            .or_insert(0) += 1;
    }

    fn record_duration(&self, source: &str, duration: Duration) {
        locked(&self.durations)
            .entry(source.to_string())
            .or_default()
            .push(duration);
    }
}

/// Forwards every call to several sinks.
#[derive(Default, Clone)]
pub struct FanoutMetrics {
    sinks: Vec<std::sync::Arc<dyn MetricsSink>>,
}

impl FanoutMetrics {
    pub fn new(sinks: Vec<std::sync::Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

impl MetricsSink for FanoutMetrics {
    fn record_run(&self, source: &str, status: RunStatus) {
        self.sinks.iter().for_each(|s| s.record_run(source, status));
    }

    fn record_items(&self, source: &str, count: u64) {
        self.sinks.iter().for_each(|s| s.record_items(source, count));
    }

    fn record_error(&self, source: &str, kind: ErrorKind) {
        self.sinks.iter().for_each(|s| s.record_error(source, kind));
    }

    fn record_duration(&self, source: &str, duration: Duration) {
        self.sinks
            .iter()
            .for_each(|s| s.record_duration(source, duration));
    }
}
