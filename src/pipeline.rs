use crate::consumer::{Consumer, Processor, Terminal};
use crate::dedup::DedupFilter;
use crate::dispatch::ShardedDispatcher;
use crate::error::{PipelineError, Result};
use crate::event::Event;
use crate::guard::{ConcurrencyGuard, ViolationPolicy};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::queue::QueueBound;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default lifetime of a seen-UUID entry
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Builder for assembling a pipeline around a terminal consumer
pub struct PipelineBuilder {
    workers: Option<usize>,
    dedup_window: Duration,
    queue_bound: QueueBound,
    guard: Option<ViolationPolicy>,
}

impl PipelineBuilder {
    /// Create a builder with default dedup window, unbounded queues, and
    /// the concurrency guard disabled
    pub fn new() -> Self {
        Self {
            workers: None,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            queue_bound: QueueBound::Unbounded,
            guard: None,
        }
    }

    /// Set the shard worker count. Required: size it so that
    /// `workers × (1 / service_time) ≥ arrival_rate`, with headroom for
    /// jitter and spikes.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the deduplication window
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Set the per-shard queue capacity and overflow policy
    pub fn queue_bound(mut self, bound: QueueBound) -> Self {
        self.queue_bound = bound;
        self
    }

    /// Enable the concurrency guard with the given violation policy
    pub fn guard(mut self, policy: ViolationPolicy) -> Self {
        self.guard = Some(policy);
        self
    }

    /// Assemble the chain outside-in: terminal, optional guard, dispatcher,
    /// dedup filter. Spawns the shard workers.
    pub fn build<P: Processor + 'static>(self, terminal: P) -> Result<Pipeline> {
        let workers = self.workers.ok_or_else(|| {
            PipelineError::Config("worker count is required; no default is provided".into())
        })?;
        if workers == 0 {
            return Err(PipelineError::Config(
                "worker count must be at least 1".into(),
            ));
        }
        if self.dedup_window.is_zero() {
            return Err(PipelineError::Config(
                "dedup window must be positive".into(),
            ));
        }
        if let QueueBound::Bounded { capacity: 0, .. } = self.queue_bound {
            return Err(PipelineError::Config(
                "bounded queue capacity must be at least 1".into(),
            ));
        }

        let metrics = PipelineMetrics::new();
        let terminal: Arc<dyn Consumer> = Arc::new(Terminal::new(terminal, metrics.clone()));
        let inner: Arc<dyn Consumer> = match self.guard {
            Some(policy) => Arc::new(ConcurrencyGuard::new(policy, terminal, metrics.clone())),
            None => terminal,
        };
        let dispatcher = Arc::new(ShardedDispatcher::start(
            workers,
            self.queue_bound,
            inner,
            metrics.clone(),
        )?);
        let downstream: Arc<dyn Consumer> = dispatcher.clone() as Arc<dyn Consumer>;
        let head = DedupFilter::new(self.dedup_window, downstream, metrics.clone());

        debug!(workers, "pipeline started");
        Ok(Pipeline {
            head,
            dispatcher,
            metrics,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled event-dispatch pipeline.
///
/// `Send + Sync`: share it (or an `Arc` of it) across producer threads and
/// push through [`Pipeline::accept`], the single entry point.
pub struct Pipeline {
    head: DedupFilter,
    dispatcher: Arc<ShardedDispatcher>,
    metrics: PipelineMetrics,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Submit an event. Returns once the event is filtered and enqueued;
    /// downstream work happens on the owning shard's worker thread.
    ///
    /// Fails with [`PipelineError::Shutdown`] once `close` has begun.
    pub fn accept(&self, event: Event) -> Result<()> {
        self.head.accept(event)
    }

    /// Stop intake, drain every shard queue to completion, and join the
    /// workers. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.dispatcher.close()
    }

    /// Forced stop: abandon queued events (counted as dropped) and join
    /// the workers.
    pub fn abort(&self) -> Result<()> {
        self.dispatcher.abort()
    }

    /// Whether the pipeline still accepts events
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    /// Number of shard workers
    pub fn worker_count(&self) -> usize {
        self.dispatcher.worker_count()
    }

    /// Live counters and latency percentiles
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Assemble a point-in-time snapshot of all counters and gauges
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.metrics.total_submitted(),
            completed: self.metrics.total_completed(),
            dropped: self.metrics.total_dropped(),
            duplicates: self.metrics.total_duplicates(),
            downstream_errors: self.metrics.total_downstream_errors(),
            violations: self.metrics.total_violations(),
            cache_size: self.head.cache_size(),
            queue_depths: self.dispatcher.queue_depths(),
            queue_depth_mean: self.dispatcher.mean_queue_depth(),
            latency_p50_us: self.metrics.latency_p50_us(),
            latency_p95_us: self.metrics.latency_p95_us(),
            latency_p99_us: self.metrics.latency_p99_us(),
        }
    }
}

impl Drop for Pipeline {
    /// Drain rather than leak workers when the pipeline is dropped
    /// without an explicit `close`
    fn drop(&mut self) {
        if self.dispatcher.is_running() {
            let _ = self.dispatcher.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_terminal() -> impl Processor {
        |event: Event| Ok(event)
    }

    #[test]
    fn test_workers_required() {
        let result = Pipeline::builder().build(noop_terminal());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Pipeline::builder().workers(0).build(noop_terminal());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = Pipeline::builder()
            .workers(1)
            .dedup_window(Duration::ZERO)
            .build(noop_terminal());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Pipeline::builder()
            .workers(1)
            .queue_bound(QueueBound::Bounded {
                capacity: 0,
                policy: crate::queue::OverflowPolicy::Block,
            })
            .build(noop_terminal());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_empty_stream_close() {
        let pipeline = Pipeline::builder().workers(2).build(noop_terminal()).unwrap();
        assert!(pipeline.is_running());
        pipeline.close().unwrap();
        assert!(!pipeline.is_running());
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.submitted, 0);
        assert_eq!(snapshot.completed, 0);
    }

    #[test]
    fn test_accept_after_close_fails() {
        let pipeline = Pipeline::builder().workers(1).build(noop_terminal()).unwrap();
        pipeline.close().unwrap();
        assert!(matches!(
            pipeline.accept(Event::generate(1)),
            Err(PipelineError::Shutdown)
        ));
    }

    #[test]
    fn test_single_event_round_trip() {
        let pipeline = Pipeline::builder().workers(1).build(noop_terminal()).unwrap();
        pipeline.accept(Event::generate(1)).unwrap();
        pipeline.close().unwrap();
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.submitted, 1);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.cache_size, 1);
        assert_eq!(snapshot.queue_depth_mean, 0.0);
    }

    #[test]
    fn test_guarded_pipeline_reports_no_violations() {
        let pipeline = Pipeline::builder()
            .workers(4)
            .guard(ViolationPolicy::Skip)
            .build(noop_terminal())
            .unwrap();
        for i in 0..100 {
            pipeline.accept(Event::generate(i % 10)).unwrap();
        }
        pipeline.close().unwrap();
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.violations, 0);
        assert_eq!(snapshot.completed, 100);
    }

    #[test]
    fn test_drop_drains_without_explicit_close() {
        let pipeline = Pipeline::builder().workers(2).build(noop_terminal()).unwrap();
        for i in 0..50 {
            pipeline.accept(Event::generate(i)).unwrap();
        }
        drop(pipeline);
    }
}
