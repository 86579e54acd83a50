use crate::consumer::Consumer;
use crate::error::Result;
use crate::event::Event;
use crate::metrics::PipelineMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Upper bound on how long the `Wait` policy holds the event.
pub const MAX_VIOLATION_WAIT: Duration = Duration::from_secs(1);

/// What to do with an event whose client is already being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Report the violation and discard the event (default)
    Skip,
    /// Report, then wait up to [`MAX_VIOLATION_WAIT`] for the client to
    /// become free; discard if it does not
    Wait,
}

/// Optional stage asserting that processing for one `client_id` never
/// overlaps.
///
/// With the sharded dispatcher upstream, contention is impossible: every
/// client is pinned to a single worker. This stage is an oracle for that
/// invariant, not a correctness mechanism. Each client gets a lazily
/// created non-reentrant mutex; finding it held by another thread means
/// the wiring is broken somewhere upstream.
pub struct ConcurrencyGuard {
    locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
    policy: ViolationPolicy,
    next: Arc<dyn Consumer>,
    metrics: PipelineMetrics,
}

impl ConcurrencyGuard {
    /// Create a guard in front of `next`
    pub fn new(policy: ViolationPolicy, next: Arc<dyn Consumer>, metrics: PipelineMetrics) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            policy,
            next,
            metrics,
        }
    }

    fn lock_for(&self, client_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(client_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Number of clients sighted so far
    pub fn tracked_clients(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Consumer for ConcurrencyGuard {
    fn accept(&self, event: Event) -> Result<()> {
        let lock = self.lock_for(event.client_id());

        // Uncontended path: the guard is released when `_held` drops, and
        // only then, so a failed acquisition never unlocks anything.
        if let Some(_held) = lock.try_lock() {
            return self.next.accept(event);
        }

        self.metrics.record_violation();
        warn!(
            client_id = event.client_id(),
            uuid = %event.uuid(),
            "concurrent processing detected for client"
        );

        match self.policy {
            ViolationPolicy::Skip => Ok(()),
            ViolationPolicy::Wait => match lock.try_lock_for(MAX_VIOLATION_WAIT) {
                Some(_held) => self.next.accept(event),
                None => {
                    warn!(
                        client_id = event.client_id(),
                        "client still busy after bounded wait; discarding event"
                    );
                    Ok(())
                }
            },
        }
    }
}
