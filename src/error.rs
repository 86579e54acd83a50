use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type produced by a terminal consumer.
///
/// The pipeline does not interpret these beyond logging and counting them;
/// any error type the embedding application uses can be boxed into one.
pub type DownstreamError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pipeline construction and operation
#[derive(Error, Debug)]
pub enum PipelineError {
    /// `accept` was called after `close` began; the producer must stop.
    #[error("pipeline is shut down")]
    Shutdown,

    /// Invalid builder configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The terminal consumer rejected an event. Never surfaces to the
    /// producer: workers catch this, count it, and move on.
    #[error("terminal consumer failed: {0}")]
    Downstream(DownstreamError),

    /// Worker thread spawn or join failure
    #[error("worker thread error: {0}")]
    Thread(String),
}
