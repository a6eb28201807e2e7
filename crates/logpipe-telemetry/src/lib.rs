// SPDX-License-Identifier: MIT OR Apache-2.0
//! logpipe-telemetry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Named metrics for the logpipe engine.
//!
//! Metrics are addressed by dotted names (`Pipeline.main.inflight`,
//! `Allevents.failed`, ...); the [`names`] module builds them. A [`Metrics`]
//! registry is shared by every worker behind an `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of timer samples kept for percentile estimates.
const TIMER_SAMPLES: usize = 1024;

/// Number of recent exception records retained.
const RECENT_EXCEPTIONS: usize = 100;

// ---------------------------------------------------------------------------
// Metric names
// ---------------------------------------------------------------------------

/// Builders for the fixed dotted metric names.
pub mod names {
    /// Meter marked for every dropped event.
    pub const ALL_DROPPED: &str = "Allevents.dropped";
    /// Meter marked for every failed event.
    pub const ALL_FAILED: &str = "Allevents.failed";

    /// Counter used as the inflight gauge of a pipeline.
    pub fn inflight(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.inflight")
    }

    /// Processing latency timer of a pipeline.
    pub fn timer(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.timer")
    }

    /// Meter of events dropped in a pipeline.
    pub fn dropped(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.dropped")
    }

    /// Meter of events failed in a pipeline.
    pub fn failed(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.failed")
    }

    /// Counter of unexpected processor errors in a pipeline.
    pub fn exception(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.exception")
    }

    /// Meter of events lost because the input queue refused them.
    pub fn blocked_in(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.blocked.in")
    }

    /// Meter of events lost because the output queue refused them.
    pub fn blocked_out(pipeline: &str) -> String {
        format!("Pipeline.{pipeline}.blocked.out")
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Signed counter; doubles as a gauge through [`inc`](Self::inc)/[`dec`](Self::dec).
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

impl Counter {
    /// Add one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Relaxed);
    }

    /// Subtract one.
    pub fn dec(&self) {
        self.0.fetch_sub(1, Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.0.load(Relaxed)
    }
}

/// Monotonic event meter.
#[derive(Debug, Default)]
pub struct Meter(AtomicU64);

impl Meter {
    /// Record one occurrence.
    pub fn mark(&self) {
        self.0.fetch_add(1, Relaxed);
    }

    /// Occurrences so far.
    pub fn count(&self) -> u64 {
        self.0.load(Relaxed)
    }
}

/// Latency timer keeping totals and a bounded window of recent samples.
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

impl Timer {
    /// Start timing; the elapsed time is recorded when the guard drops.
    pub fn time(self: &Arc<Self>) -> TimerContext {
        TimerContext {
            timer: Arc::clone(self),
            started: Instant::now(),
        }
    }

    /// Record one duration.
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Relaxed);
        self.total_nanos.fetch_add(nanos, Relaxed);
        let mut samples = self.samples.lock().expect("timer lock poisoned");
        if samples.len() == TIMER_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    /// Number of recorded durations.
    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    /// Point-in-time summary.
    pub fn snapshot(&self) -> TimerSnapshot {
        let count = self.count();
        let total = self.total_nanos.load(Relaxed);
        let mut sorted: Vec<u64> = self
            .samples
            .lock()
            .expect("timer lock poisoned")
            .iter()
            .copied()
            .collect();
        sorted.sort_unstable();
        TimerSnapshot {
            count,
            mean_micros: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64 / 1_000.0
            },
            p50_micros: percentile(&sorted, 50.0) / 1_000.0,
            p99_micros: percentile(&sorted, 99.0) / 1_000.0,
        }
    }
}

/// Drop guard returned by [`Timer::time`].
#[derive(Debug)]
pub struct TimerContext {
    timer: Arc<Timer>,
    started: Instant,
}

impl Drop for TimerContext {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// ExceptionStats
// ---------------------------------------------------------------------------

/// Whether a record came from a recoverable error or an unexpected exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recoverable processing error.
    Error,
    /// Unexpected exception.
    Exception,
}

/// A single recorded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    /// Error or exception.
    pub severity: Severity,
    /// Stable kind tag (e.g. `"PROCESSING"`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

#[derive(Debug, Default)]
struct ExceptionInner {
    by_kind: BTreeMap<String, u64>,
    recent: VecDeque<ExceptionRecord>,
}

/// Process-wide error and exception statistics.
#[derive(Debug, Default)]
pub struct ExceptionStats {
    errors: AtomicU64,
    exceptions: AtomicU64,
    inner: Mutex<ExceptionInner>,
}

impl ExceptionStats {
    /// Record a recoverable processing error.
    pub fn new_error(&self, kind: &str, message: impl Into<String>) {
        self.errors.fetch_add(1, Relaxed);
        self.push(Severity::Error, kind, message.into());
    }

    /// Record an unexpected exception.
    pub fn new_exception(&self, kind: &str, message: impl Into<String>) {
        self.exceptions.fetch_add(1, Relaxed);
        self.push(Severity::Exception, kind, message.into());
    }

    fn push(&self, severity: Severity, kind: &str, message: String) {
        let mut inner = self.inner.lock().expect("exception stats lock poisoned");
        *inner.by_kind.entry(kind.to_string()).or_insert(0) += 1;
        if inner.recent.len() == RECENT_EXCEPTIONS {
            inner.recent.pop_front();
        }
        inner.recent.push_back(ExceptionRecord {
            severity,
            kind: kind.to_string(),
            message,
        });
    }

    /// Recoverable errors recorded so far.
    pub fn errors(&self) -> u64 {
        self.errors.load(Relaxed)
    }

    /// Unexpected exceptions recorded so far.
    pub fn exceptions(&self) -> u64 {
        self.exceptions.load(Relaxed)
    }

    /// Counts per kind tag (deterministic ordering).
    pub fn by_kind(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .expect("exception stats lock poisoned")
            .by_kind
            .clone()
    }

    /// Most recent records, oldest first.
    pub fn recent(&self) -> Vec<ExceptionRecord> {
        self.inner
            .lock()
            .expect("exception stats lock poisoned")
            .recent
            .iter()
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Metrics registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: Default> Registry<T> {
    fn get_or_create(&self, name: &str) -> Arc<T> {
        if let Some(found) = self
            .entries
            .read()
            .expect("metrics lock poisoned")
            .get(name)
        {
            return Arc::clone(found);
        }
        let mut entries = self.entries.write().expect("metrics lock poisoned");
        Arc::clone(entries.entry(name.to_string()).or_insert_with(|| {
            debug!(target: "logpipe.telemetry", metric = %name, "registered metric");
            Arc::new(T::default())
        }))
    }

    fn find(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .expect("metrics lock poisoned")
            .get(name)
            .cloned()
    }

    fn collect<V>(&self, f: impl Fn(&T) -> V) -> BTreeMap<String, V> {
        self.entries
            .read()
            .expect("metrics lock poisoned")
            .iter()
            .map(|(name, metric)| (name.clone(), f(metric)))
            .collect()
    }
}

/// Thread-safe registry of named metrics.
///
/// Metrics are created on first use. Wrap in an `Arc` to share across
/// threads.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Registry<Counter>,
    meters: Registry<Meter>,
    timers: Registry<Timer>,
    exceptions: ExceptionStats,
}

impl Metrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter named `name`.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counters.get_or_create(name)
    }

    /// Meter named `name`.
    pub fn meter(&self, name: &str) -> Arc<Meter> {
        self.meters.get_or_create(name)
    }

    /// Timer named `name`.
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        self.timers.get_or_create(name)
    }

    /// Global error and exception statistics.
    pub fn exceptions(&self) -> &ExceptionStats {
        &self.exceptions
    }

    /// Value of a counter, `0` if it was never used.
    pub fn counter_value(&self, name: &str) -> i64 {
        self.counters.find(name).map_or(0, |c| c.get())
    }

    /// Count of a meter, `0` if it was never used.
    pub fn meter_count(&self, name: &str) -> u64 {
        self.meters.find(name).map_or(0, |m| m.count())
    }

    /// Count of a timer, `0` if it was never used.
    pub fn timer_count(&self, name: &str) -> u64 {
        self.timers.find(name).map_or(0, |t| t.count())
    }

    /// Take a point-in-time snapshot of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.collect(Counter::get),
            meters: self.meters.collect(Meter::count),
            timers: self.timers.collect(Timer::snapshot),
            errors: self.exceptions.errors(),
            exceptions: self.exceptions.exceptions(),
            by_kind: self.exceptions.by_kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots and export
// ---------------------------------------------------------------------------

/// Summary of a [`Timer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// Recorded durations.
    pub count: u64,
    /// Mean duration in microseconds.
    pub mean_micros: f64,
    /// Median of the recent window in microseconds.
    pub p50_micros: f64,
    /// 99th percentile of the recent window in microseconds.
    pub p99_micros: f64,
}

/// Serialisable snapshot of a [`Metrics`] registry (deterministic ordering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values.
    pub counters: BTreeMap<String, i64>,
    /// Meter counts.
    pub meters: BTreeMap<String, u64>,
    /// Timer summaries.
    pub timers: BTreeMap<String, TimerSnapshot>,
    /// Recoverable errors recorded.
    pub errors: u64,
    /// Unexpected exceptions recorded.
    pub exceptions: u64,
    /// Error/exception counts per kind tag.
    pub by_kind: BTreeMap<String, u64>,
}

/// Trait for exporting metric snapshots.
pub trait TelemetryExporter: Send + Sync {
    /// Export the given snapshot. Returns the serialized output on success.
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<String, String>;
}

/// Exports snapshots as pretty-printed JSON.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<String, String> {
        serde_json::to_string_pretty(snapshot).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn names_follow_dotted_convention() {
        assert_eq!(names::inflight("main"), "Pipeline.main.inflight");
        assert_eq!(names::blocked_in("alerts"), "Pipeline.alerts.blocked.in");
        assert_eq!(names::blocked_out("main"), "Pipeline.main.blocked.out");
        assert_eq!(names::exception("p"), "Pipeline.p.exception");
    }

    #[test]
    fn counter_works_as_gauge() {
        let m = Metrics::new();
        let gauge = m.counter("g");
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(m.counter_value("g"), 1);
    }

    #[test]
    fn same_name_same_metric() {
        let m = Metrics::new();
        m.meter("x").mark();
        m.meter("x").mark();
        assert_eq!(m.meter_count("x"), 2);
    }

    #[test]
    fn unknown_metrics_read_as_zero() {
        let m = Metrics::new();
        assert_eq!(m.counter_value("nope"), 0);
        assert_eq!(m.meter_count("nope"), 0);
        assert_eq!(m.timer_count("nope"), 0);
    }

    #[test]
    fn timer_context_records_on_drop() {
        let m = Metrics::new();
        let timer = m.timer("t");
        {
            let _ctx = timer.time();
        }
        assert_eq!(m.timer_count("t"), 1);
        let snap = timer.snapshot();
        assert_eq!(snap.count, 1);
        assert!(snap.p99_micros >= snap.p50_micros);
    }

    #[test]
    fn timer_window_is_bounded() {
        let timer = Timer::default();
        for i in 0..(TIMER_SAMPLES + 10) {
            timer.record(Duration::from_nanos(i as u64));
        }
        assert_eq!(timer.count(), (TIMER_SAMPLES + 10) as u64);
        assert_eq!(timer.samples.lock().unwrap().len(), TIMER_SAMPLES);
    }

    #[test]
    fn exception_stats_track_kinds_and_recent() {
        let stats = ExceptionStats::default();
        stats.new_error("PROCESSING", "bad field");
        stats.new_exception("UNEXPECTED", "boom");
        stats.new_exception("UNEXPECTED", "boom again");
        assert_eq!(stats.errors(), 1);
        assert_eq!(stats.exceptions(), 2);
        assert_eq!(stats.by_kind()["UNEXPECTED"], 2);
        let recent = stats.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].severity, Severity::Error);
    }

    #[test]
    fn exception_history_is_bounded() {
        let stats = ExceptionStats::default();
        for i in 0..(RECENT_EXCEPTIONS + 5) {
            stats.new_exception("UNEXPECTED", format!("e{i}"));
        }
        let recent = stats.recent();
        assert_eq!(recent.len(), RECENT_EXCEPTIONS);
        assert_eq!(recent[0].message, "e5");
    }

    #[test]
    fn concurrent_marks_are_not_lost() {
        let m = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.meter(names::ALL_FAILED).mark();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.meter_count(names::ALL_FAILED), 8000);
    }

    #[test]
    fn json_exporter_is_deterministic() {
        let m = Metrics::new();
        m.meter("zebra").mark();
        m.meter("alpha").mark();
        let json = JsonExporter.export(&m.snapshot()).unwrap();
        assert!(json.find("\"alpha\"").unwrap() < json.find("\"zebra\"").unwrap());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["meters"]["alpha"], 1);
    }

    #[test]
    fn percentile_edge_cases() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[42], 99.0), 42.0);
        assert!((percentile(&[10, 20, 30, 40], 50.0) - 25.0).abs() < f64::EPSILON);
    }
}
