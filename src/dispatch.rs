use crate::consumer::Consumer;
use crate::error::{PipelineError, Result};
use crate::event::Event;
use crate::metrics::PipelineMetrics;
use crate::queue::{PushOutcome, QueueBound, ShardQueue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

// Worker lifecycle: Running -> Draining -> Stopped. Draining rejects new
// events but processes what is queued; Stopped abandons the queue.
const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

/// How long an idle worker sleeps between polls of its queue
const IDLE_POLL: Duration = Duration::from_micros(10);

/// Routes each event to a fixed worker by `client_id` and returns without
/// waiting on downstream work.
///
/// One dedicated thread drains each shard's FIFO queue. Because every
/// `client_id` maps to exactly one shard and each shard has exactly one
/// consumer, events for the same client are serialized by construction —
/// no locks on the critical path.
pub struct ShardedDispatcher {
    shards: Vec<ShardQueue<Event>>,
    state: Arc<AtomicU8>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    metrics: PipelineMetrics,
}

impl ShardedDispatcher {
    /// Spawn `workers` shard threads draining into `next`.
    pub fn start(
        workers: usize,
        bound: QueueBound,
        next: Arc<dyn Consumer>,
        metrics: PipelineMetrics,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(PipelineError::Config(
                "worker count must be at least 1".into(),
            ));
        }
        if let QueueBound::Bounded { capacity: 0, .. } = bound {
            return Err(PipelineError::Config(
                "bounded queue capacity must be at least 1".into(),
            ));
        }

        let state = Arc::new(AtomicU8::new(RUNNING));
        let shards: Vec<_> = (0..workers).map(|_| ShardQueue::new(bound)).collect();
        let mut handles = Vec::with_capacity(workers);
        for (index, queue) in shards.iter().enumerate() {
            let queue = queue.clone();
            let next = Arc::clone(&next);
            let state = Arc::clone(&state);
            let metrics = metrics.clone();
            let handle = thread::Builder::new()
                .name(format!("shard-worker-{index}"))
                .spawn(move || worker_loop(index, queue, next, state, metrics))
                .map_err(|e| PipelineError::Thread(format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            shards,
            state,
            handles: Mutex::new(handles),
            metrics,
        })
    }

    fn shard_for(&self, client_id: u64) -> usize {
        // Fixed for the dispatcher's lifetime; client ids are dense small
        // integers, so plain modulo spreads them evenly.
        (client_id % self.shards.len() as u64) as usize
    }

    /// Number of shard workers
    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }

    /// Pending tasks per shard
    pub fn queue_depths(&self) -> Vec<usize> {
        self.shards.iter().map(|queue| queue.len()).collect()
    }

    /// Mean pending tasks across shards
    pub fn mean_queue_depth(&self) -> f64 {
        let total: usize = self.shards.iter().map(|queue| queue.len()).sum();
        total as f64 / self.shards.len() as f64
    }

    /// Whether the dispatcher still accepts events
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Stop intake, process every queued event, then join the workers.
    /// Idempotent; later calls return immediately.
    pub fn close(&self) -> Result<()> {
        self.shutdown(DRAINING)
    }

    /// Forced stop: abandon queued events and join the workers. Abandoned
    /// tasks are counted as dropped.
    pub fn abort(&self) -> Result<()> {
        self.shutdown(STOPPED)
    }

    fn shutdown(&self, target: u8) -> Result<()> {
        let _ = self
            .state
            .compare_exchange(RUNNING, target, Ordering::AcqRel, Ordering::Acquire);
        if target == STOPPED {
            // Escalate an in-progress drain to a forced stop
            let _ = self
                .state
                .compare_exchange(DRAINING, STOPPED, Ordering::AcqRel, Ordering::Acquire);
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        let mut panicked = 0usize;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        self.state.store(STOPPED, Ordering::Release);

        // Anything still queued was abandoned by a forced stop or slipped
        // in behind a worker's final empty poll
        let mut abandoned = 0u64;
        for queue in &self.shards {
            while queue.pop().is_some() {
                self.metrics.record_dropped();
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(abandoned, "discarded tasks left behind at shutdown");
        }

        if panicked > 0 {
            return Err(PipelineError::Thread(format!(
                "{panicked} shard worker(s) panicked"
            )));
        }
        Ok(())
    }
}

impl Consumer for ShardedDispatcher {
    fn accept(&self, event: Event) -> Result<()> {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return Err(PipelineError::Shutdown);
        }
        self.metrics.record_submitted();
        let shard = self.shard_for(event.client_id());
        match self.shards[shard].push(event) {
            PushOutcome::Enqueued => Ok(()),
            PushOutcome::Dropped => {
                self.metrics.record_dropped();
                warn!(shard, "shard queue full; dropped newest event");
                Ok(())
            }
        }
    }
}

fn worker_loop(
    index: usize,
    queue: ShardQueue<Event>,
    next: Arc<dyn Consumer>,
    state: Arc<AtomicU8>,
    metrics: PipelineMetrics,
) {
    loop {
        if state.load(Ordering::Acquire) == STOPPED {
            break;
        }
        match queue.pop() {
            Some(event) => {
                // A failed event must not take the worker down with it
                if let Err(e) = next.accept(event) {
                    metrics.record_downstream_error();
                    error!(shard = index, error = %e, "downstream failure; continuing");
                } else {
                    metrics.record_completed();
                }
            }
            None => {
                if state.load(Ordering::Acquire) != RUNNING {
                    break;
                }
                thread::sleep(IDLE_POLL);
            }
        }
    }
    debug!(shard = index, "shard worker stopped");
}
