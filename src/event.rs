use std::time::Instant;
use uuid::Uuid;

/// The unit of work flowing through the pipeline.
///
/// An event is immutable once produced: stages pass it along by value and
/// never modify it. `client_id` is the routing and ordering key; `uuid`
/// identifies this particular occurrence and is the key for deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    created_at: Instant,
    client_id: u64,
    uuid: Uuid,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(client_id: u64, uuid: Uuid) -> Self {
        Self::with_created_at(Instant::now(), client_id, uuid)
    }

    /// Create an event with an explicit creation time.
    pub fn with_created_at(created_at: Instant, client_id: u64, uuid: Uuid) -> Self {
        Self {
            created_at,
            client_id,
            uuid,
        }
    }

    /// Create an event with a freshly generated occurrence id.
    pub fn generate(client_id: u64) -> Self {
        Self::new(client_id, Uuid::new_v4())
    }

    /// Production timestamp; the source of latency measurement.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Routing and ordering key.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Globally unique id of this event occurrence.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}
