use crate::error::{DownstreamError, PipelineError, Result};
use crate::event::Event;
use crate::metrics::PipelineMetrics;

/// Contract for a stage in the pipeline chain.
///
/// Each stage accepts an event, performs its local responsibility, and
/// forwards to the next stage it holds a reference to. Stages are called
/// concurrently from producer and worker threads.
pub trait Consumer: Send + Sync {
    /// Accept one event for processing.
    fn accept(&self, event: Event) -> Result<()>;
}

/// Contract for the user-supplied terminal consumer.
///
/// `process` is synchronous and may block for the full service time
/// (tens of milliseconds). Implementations must be thread-safe across
/// distinct `client_id`s; the dispatcher guarantees calls for the same
/// `client_id` never overlap.
pub trait Processor: Send + Sync {
    fn process(&self, event: Event) -> std::result::Result<Event, DownstreamError>;
}

impl<F> Processor for F
where
    F: Fn(Event) -> std::result::Result<Event, DownstreamError> + Send + Sync,
{
    fn process(&self, event: Event) -> std::result::Result<Event, DownstreamError> {
        self(event)
    }
}

/// Innermost link of the chain: adapts a [`Processor`] to the stage
/// contract and samples end-to-end latency at the start of processing.
pub(crate) struct Terminal<P> {
    processor: P,
    metrics: PipelineMetrics,
}

impl<P: Processor> Terminal<P> {
    pub(crate) fn new(processor: P, metrics: PipelineMetrics) -> Self {
        Self { processor, metrics }
    }
}

impl<P: Processor> Consumer for Terminal<P> {
    fn accept(&self, event: Event) -> Result<()> {
        self.metrics.record_latency(event.created_at().elapsed());
        match self.processor.process(event) {
            Ok(_) => Ok(()),
            Err(e) => Err(PipelineError::Downstream(e)),
        }
    }
}
