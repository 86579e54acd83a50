//! A real-time event dispatch pipeline with per-key ordering and
//! bounded-window deduplication.
//!
//! This crate provides a chain of consumer stages that delivers a push-based
//! event stream to a user-supplied terminal consumer while keeping latency
//! bounded under sustained load.
//!
//! # Features
//!
//! - Sharded dispatch: one dedicated worker thread per shard, so events for
//!   the same `client_id` are strictly serialized while distinct clients
//!   process in parallel
//! - Sliding-window deduplication keyed on the event uuid
//! - Optional concurrency guard asserting that same-client processing
//!   never overlaps
//! - Unbounded or bounded shard queues with configurable overflow policies
//!   (Block or DropNewest)
//! - Per-pipeline metrics: counters, queue-depth gauges, latency percentiles
//! - Graceful drain on close; forced abort as an explicit escape hatch
//!
//! # Example
//!
//! ```ignore
//! use event_pipeline::{Event, Pipeline};
//! use std::time::Duration;
//!
//! let pipeline = Pipeline::builder()
//!     .workers(20)
//!     .dedup_window(Duration::from_secs(10))
//!     .build(|event| {
//!         // application-specific work: DB write, RPC, ...
//!         Ok(event)
//!     })?;
//!
//! pipeline.accept(Event::generate(42))?;
//!
//! // Drains every shard queue, then joins the workers
//! pipeline.close()?;
//! ```

pub mod consumer;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod guard;
pub mod metrics;
pub mod pipeline;
pub mod queue;

// Re-exports for convenience
pub use consumer::{Consumer, Processor};
pub use dedup::{DedupFilter, SeenWindow};
pub use dispatch::ShardedDispatcher;
pub use error::{DownstreamError, PipelineError, Result};
pub use event::Event;
pub use guard::{ConcurrencyGuard, ViolationPolicy, MAX_VIOLATION_WAIT};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, DEFAULT_DEDUP_WINDOW};
pub use queue::{OverflowPolicy, QueueBound, ShardQueue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
