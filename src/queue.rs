use crossbeam::queue::{ArrayQueue, SegQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Determines how a bounded shard queue handles overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block (spin-wait) the producer until space is available
    Block,
    /// Drop the incoming event and count it
    DropNewest,
}

/// Capacity configuration for the per-shard work queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBound {
    /// Queues grow without limit; saturation shows up in the depth gauges
    Unbounded,
    /// Queues hold at most `capacity` pending events each
    Bounded {
        capacity: usize,
        policy: OverflowPolicy,
    },
}

/// Result of offering an event to a shard queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Rejected by a bounded queue's `DropNewest` policy
    Dropped,
}

#[derive(Debug)]
enum Inner<T> {
    Unbounded(SegQueue<T>),
    Bounded(ArrayQueue<T>, OverflowPolicy),
}

/// A multi-producer single-consumer FIFO queue feeding one shard worker.
///
/// Backed by crossbeam's lock-free queues: `SegQueue` when unbounded,
/// `ArrayQueue` when bounded. Both ends preserve insertion order, which is
/// what carries the per-key ordering guarantee through the dispatcher.
#[derive(Debug)]
pub struct ShardQueue<T: Send> {
    inner: Arc<Inner<T>>,
    dropped_count: Arc<AtomicU64>,
}

impl<T: Send> Clone for ShardQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            dropped_count: Arc::clone(&self.dropped_count),
        }
    }
}

impl<T: Send> ShardQueue<T> {
    /// Create a new shard queue with the given bound
    pub fn new(bound: QueueBound) -> Self {
        let inner = match bound {
            QueueBound::Unbounded => Inner::Unbounded(SegQueue::new()),
            QueueBound::Bounded { capacity, policy } => {
                Inner::Bounded(ArrayQueue::new(capacity), policy)
            }
        };
        Self {
            inner: Arc::new(inner),
            dropped_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offer an item to the queue, applying the overflow policy when full
    pub fn push(&self, item: T) -> PushOutcome {
        match &*self.inner {
            Inner::Unbounded(queue) => {
                queue.push(item);
                PushOutcome::Enqueued
            }
            Inner::Bounded(queue, policy) => match queue.push(item) {
                Ok(()) => PushOutcome::Enqueued,
                Err(item) => match policy {
                    OverflowPolicy::Block => {
                        self.push_blocking(queue, item);
                        PushOutcome::Enqueued
                    }
                    OverflowPolicy::DropNewest => {
                        self.dropped_count.fetch_add(1, Ordering::Relaxed);
                        PushOutcome::Dropped
                    }
                },
            },
        }
    }

    /// Push with blocking until space is available
    fn push_blocking(&self, queue: &ArrayQueue<T>, mut item: T) {
        loop {
            match queue.push(item) {
                Ok(()) => return,
                Err(i) => {
                    item = i;
                    // Spin with a small backoff to reduce CPU usage
                    thread::sleep(Duration::from_micros(1));
                }
            }
        }
    }

    /// Attempt to pop an item from the queue
    pub fn pop(&self) -> Option<T> {
        match &*self.inner {
            Inner::Unbounded(queue) => queue.pop(),
            Inner::Bounded(queue, _) => queue.pop(),
        }
    }

    /// Get the current number of pending items
    pub fn len(&self) -> usize {
        match &*self.inner {
            Inner::Unbounded(queue) => queue.len(),
            Inner::Bounded(queue, _) => queue.len(),
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the capacity, if bounded
    pub fn capacity(&self) -> Option<usize> {
        match &*self.inner {
            Inner::Unbounded(_) => None,
            Inner::Bounded(queue, _) => Some(queue.capacity()),
        }
    }

    /// Get the number of items dropped by the overflow policy
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_push_pop() {
        let queue = ShardQueue::new(QueueBound::Unbounded);
        assert_eq!(queue.push(42), PushOutcome::Enqueued);
        assert_eq!(queue.pop(), Some(42));
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), None);
    }

    #[test]
    fn test_fifo_order() {
        let queue = ShardQueue::new(QueueBound::Unbounded);
        for i in 0..100 {
            queue.push(i);
        }
        for i in 0..100 {
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn test_drop_newest_policy() {
        let queue = ShardQueue::new(QueueBound::Bounded {
            capacity: 3,
            policy: OverflowPolicy::DropNewest,
        });
        assert_eq!(queue.push(1), PushOutcome::Enqueued);
        assert_eq!(queue.push(2), PushOutcome::Enqueued);
        assert_eq!(queue.push(3), PushOutcome::Enqueued);
        assert_eq!(queue.push(4), PushOutcome::Dropped);
        assert_eq!(queue.dropped_count(), 1);
        // Survivors keep their order
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_block_policy_resumes_after_pop() {
        let queue = ShardQueue::new(QueueBound::Bounded {
            capacity: 2,
            policy: OverflowPolicy::Block,
        });
        assert_eq!(queue.push(1), PushOutcome::Enqueued);
        assert_eq!(queue.push(2), PushOutcome::Enqueued);

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.push(3))
        };
        // Free a slot so the blocked push can complete
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(producer.join().unwrap(), PushOutcome::Enqueued);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_bounded_capacity() {
        let queue: ShardQueue<i32> = ShardQueue::new(QueueBound::Bounded {
            capacity: 42,
            policy: OverflowPolicy::Block,
        });
        assert_eq!(queue.capacity(), Some(42));
    }
}
