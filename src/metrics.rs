use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How many of the most recent latency samples feed the percentiles
const LATENCY_WINDOW: usize = 1000;

/// Counters and the latency window for a running pipeline.
///
/// Cheap to clone; clones share the same underlying counters. Gauges that
/// reflect live structure sizes (seen-UUID table, shard queues) are read
/// from the owning stages when a [`MetricsSnapshot`] is assembled.
///
/// Latency is sampled at the start of terminal processing as
/// `now − created_at`; percentiles are computed over a sliding window of
/// the most recent samples, so they track current behavior rather than
/// the lifetime average.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Events admitted by the dispatcher (passed the shutdown gate)
    submitted: Arc<AtomicU64>,
    /// Events fully processed by the terminal consumer
    completed: Arc<AtomicU64>,
    /// Events dropped by a bounded queue's overflow policy or abandoned at shutdown
    dropped: Arc<AtomicU64>,
    /// Events dropped as duplicates inside the dedup window
    duplicates: Arc<AtomicU64>,
    /// Terminal consumer failures caught by workers
    downstream_errors: Arc<AtomicU64>,
    /// Overlapping same-key processing detected by the concurrency guard
    violations: Arc<AtomicU64>,
    /// End-to-end latencies in nanoseconds, most recent last
    latency_ns: Arc<Mutex<VecDeque<u64>>>,
}

impl PipelineMetrics {
    /// Create a fresh metrics collector
    pub fn new() -> Self {
        Self {
            submitted: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            duplicates: Arc::new(AtomicU64::new(0)),
            downstream_errors: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU64::new(0)),
            latency_ns: Arc::new(Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW))),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_downstream_error(&self) {
        self.downstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Add one end-to-end latency sample, evicting the oldest once the
    /// window is full
    pub(crate) fn record_latency(&self, latency: Duration) {
        let mut window = self.latency_ns.lock();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_nanos() as u64);
    }

    /// Total events admitted by the dispatcher
    pub fn total_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Total events fully processed by the terminal consumer
    pub fn total_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Total events dropped by overflow policy or abandoned at shutdown
    pub fn total_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total events dropped as duplicates
    pub fn total_duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Total terminal consumer failures
    pub fn total_downstream_errors(&self) -> u64 {
        self.downstream_errors.load(Ordering::Relaxed)
    }

    /// Total concurrency violations detected
    pub fn total_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Latency at `quantile` (0.0..=1.0) over the sample window, in
    /// microseconds. Zero when no samples have been recorded.
    fn latency_quantile_us(&self, quantile: f64) -> f64 {
        let window = self.latency_ns.lock();
        if window.is_empty() {
            return 0.0;
        }
        let mut samples: Vec<u64> = window.iter().copied().collect();
        samples.sort_unstable();
        // Nearest-rank: the smallest sample covering `quantile` of the window
        let rank = ((samples.len() as f64 * quantile).ceil() as usize)
            .clamp(1, samples.len());
        samples[rank - 1] as f64 / 1_000.0
    }

    /// Get P50 end-to-end latency in microseconds
    pub fn latency_p50_us(&self) -> f64 {
        self.latency_quantile_us(0.50)
    }

    /// Get P95 end-to-end latency in microseconds
    pub fn latency_p95_us(&self) -> f64 {
        self.latency_quantile_us(0.95)
    }

    /// Get P99 end-to-end latency in microseconds
    pub fn latency_p99_us(&self) -> f64 {
        self.latency_quantile_us(0.99)
    }

    /// Number of latency samples currently in the window
    pub fn latency_samples(&self) -> usize {
        self.latency_ns.lock().len()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of pipeline metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub dropped: u64,
    pub duplicates: u64,
    pub downstream_errors: u64,
    pub violations: u64,
    /// Entries currently held in the seen-UUID window
    pub cache_size: usize,
    /// Pending tasks per shard queue
    pub queue_depths: Vec<usize>,
    /// Mean pending tasks across shards
    pub queue_depth_mean: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Submitted: {}, Completed: {}, Dropped: {}, Duplicates: {}, \
             Errors: {}, Violations: {}, Cache: {}, Mean queue depth: {:.2}, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs",
            self.submitted,
            self.completed,
            self.dropped,
            self.duplicates,
            self.downstream_errors,
            self.violations,
            self.cache_size,
            self.queue_depth_mean,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us
        )
    }
}
