use crate::consumer::Consumer;
use crate::error::Result;
use crate::event::Event;
use crate::metrics::PipelineMetrics;
use parking_lot::Mutex;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Shard count for the seen-UUID window. Power of two so routing is a mask.
const WINDOW_SHARDS: usize = 16;

#[derive(Debug, Default)]
struct WindowShard {
    entries: HashMap<Uuid, Instant>,
    /// Insertion order, for O(1) oldest-expiry. May hold stale pairs for
    /// uuids that expired and were re-inserted; those are skipped when the
    /// recorded time no longer matches the map.
    order: VecDeque<(Uuid, Instant)>,
}

/// Time-bounded set of recently seen event uuids.
///
/// Entries expire a fixed interval after insertion. Lookups never refresh
/// an entry: a duplicate sighting does not extend the original's lifetime.
/// Expired entries are swept amortized on each insert, so steady-state
/// size is bounded by `arrival_rate × window`.
#[derive(Debug)]
pub struct SeenWindow {
    shards: Vec<Mutex<WindowShard>>,
    ttl: Duration,
    len: AtomicUsize,
}

impl SeenWindow {
    /// Create a window with the given entry lifetime
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: (0..WINDOW_SHARDS)
                .map(|_| Mutex::new(WindowShard::default()))
                .collect(),
            ttl,
            len: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, uuid: &Uuid) -> usize {
        let mut hasher = DefaultHasher::new();
        uuid.hash(&mut hasher);
        (hasher.finish() as usize) & (WINDOW_SHARDS - 1)
    }

    /// Record `uuid` as seen at `now` unless it is already present and
    /// unexpired. Returns `true` if the uuid was inserted (first sighting
    /// or expired re-sighting), `false` if it is a live duplicate.
    ///
    /// First-wins under concurrency: when two duplicates race, exactly one
    /// caller observes an insert.
    pub fn insert_if_absent(&self, uuid: Uuid, now: Instant) -> bool {
        let mut shard = self.shards[self.shard_for(&uuid)].lock();
        self.sweep_expired(&mut shard, now);

        let WindowShard { entries, order } = &mut *shard;
        match entries.entry(uuid) {
            Entry::Occupied(mut occupied) => {
                if now.saturating_duration_since(*occupied.get()) <= self.ttl {
                    return false;
                }
                // Expired but not yet swept: treat as new
                occupied.insert(now);
                order.push_back((uuid, now));
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                order.push_back((uuid, now));
                self.len.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    fn sweep_expired(&self, shard: &mut WindowShard, now: Instant) {
        while let Some(&(uuid, inserted_at)) = shard.order.front() {
            if now.saturating_duration_since(inserted_at) <= self.ttl {
                break;
            }
            shard.order.pop_front();
            // Only remove when the map still holds this insertion; a newer
            // re-insertion owns a later pair in the deque.
            if shard.entries.get(&uuid).copied() == Some(inserted_at) {
                shard.entries.remove(&uuid);
                self.len.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of uuids currently tracked
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Check if the window is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Head stage: drops events whose uuid was seen inside the dedup window
/// and forwards survivors downstream in the caller's thread.
pub struct DedupFilter {
    window: SeenWindow,
    next: Arc<dyn Consumer>,
    metrics: PipelineMetrics,
}

impl DedupFilter {
    /// Create a filter in front of `next`
    pub fn new(window: Duration, next: Arc<dyn Consumer>, metrics: PipelineMetrics) -> Self {
        Self {
            window: SeenWindow::new(window),
            next,
            metrics,
        }
    }

    /// Entries currently held in the seen-UUID window
    pub fn cache_size(&self) -> usize {
        self.window.len()
    }
}

impl Consumer for DedupFilter {
    fn accept(&self, event: Event) -> Result<()> {
        // Expiry is measured against arrival time here, not `created_at`
        if self.window.insert_if_absent(event.uuid(), Instant::now()) {
            self.next.accept(event)
        } else {
            self.metrics.record_duplicate();
            debug!(client_id = event.client_id(), uuid = %event.uuid(), "dropped duplicate");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TTL: Duration = Duration::from_millis(100);

    fn uuid_n(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_first_sighting_inserts() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        assert!(window.insert_if_absent(uuid_n(1), now));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_duplicate_inside_window_rejected() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        assert!(window.insert_if_absent(uuid_n(1), now));
        assert!(!window.insert_if_absent(uuid_n(1), now + Duration::from_millis(50)));
    }

    #[test]
    fn test_expired_entry_reinserts() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        assert!(window.insert_if_absent(uuid_n(1), now));
        assert!(window.insert_if_absent(uuid_n(1), now + Duration::from_millis(150)));
    }

    #[test]
    fn test_duplicate_does_not_refresh_lifetime() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        assert!(window.insert_if_absent(uuid_n(1), now));
        // Sighting at 80ms is a duplicate but must not extend the entry
        assert!(!window.insert_if_absent(uuid_n(1), now + Duration::from_millis(80)));
        // 120ms is past the original insertion's expiry, so this is new
        assert!(window.insert_if_absent(uuid_n(1), now + Duration::from_millis(120)));
    }

    #[test]
    fn test_sighting_exactly_at_window_edge_is_duplicate() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        assert!(window.insert_if_absent(uuid_n(1), now));
        // The bound is inclusive: an entry aged exactly one TTL is still live
        assert!(!window.insert_if_absent(uuid_n(1), now + TTL));
        // One tick past the edge it has expired
        assert!(window.insert_if_absent(
            uuid_n(1),
            now + TTL + Duration::from_nanos(1)
        ));
    }

    #[test]
    fn test_sweep_bounds_size() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        for i in 0..1000 {
            window.insert_if_absent(uuid_n(i), now);
        }
        assert_eq!(window.len(), 1000);
        // All expired; inserting fresh uuids sweeps the old generation
        let later = now + Duration::from_millis(200);
        for i in 1000..2000 {
            window.insert_if_absent(uuid_n(i), later);
        }
        assert_eq!(window.len(), 1000);
    }

    #[test]
    fn test_reinsert_keeps_stale_deque_entry_harmless() {
        let window = SeenWindow::new(TTL);
        let now = Instant::now();
        assert!(window.insert_if_absent(uuid_n(1), now));
        // Re-insert after expiry; the original deque pair goes stale
        assert!(window.insert_if_absent(uuid_n(1), now + Duration::from_millis(150)));
        assert_eq!(window.len(), 1);
        // Sweeping the stale pair must not evict the live re-insertion
        window.insert_if_absent(uuid_n(2), now + Duration::from_millis(160));
        assert_eq!(window.len(), 2);
        assert!(!window.insert_if_absent(uuid_n(1), now + Duration::from_millis(170)));
    }

    #[test]
    fn test_concurrent_duplicates_first_wins() {
        let window = Arc::new(SeenWindow::new(Duration::from_secs(10)));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let window = Arc::clone(&window);
                std::thread::spawn(move || window.insert_if_absent(uuid_n(42), now))
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(window.len(), 1);
    }

    proptest! {
        /// The window agrees with a naive model over arbitrary schedules of
        /// (uuid, arrival-offset) sightings.
        #[test]
        fn prop_matches_reference_model(
            sightings in proptest::collection::vec((0u128..8, 0u64..400), 1..64)
        ) {
            let mut sightings = sightings;
            sightings.sort_by_key(|&(_, offset)| offset);

            let window = SeenWindow::new(TTL);
            let base = Instant::now();
            let mut model: HashMap<u128, u64> = HashMap::new();

            for (key, offset) in sightings {
                let admitted = window.insert_if_absent(
                    uuid_n(key),
                    base + Duration::from_millis(offset),
                );
                let expected = match model.get(&key) {
                    Some(&seen_at) if offset.saturating_sub(seen_at) <= 100 => false,
                    _ => true,
                };
                if expected {
                    model.insert(key, offset);
                }
                prop_assert_eq!(admitted, expected);
            }
        }
    }
}
