use thiserror::Error;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced by stream engines
///
/// `Clone` so a single failure can be propagated to both ends of a
/// pipeline link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Operation attempted after a terminal state, or out of protocol
    /// (double end, emit after end, pause while piped)
    #[error("invalid stream state: {0}")]
    InvalidState(&'static str),

    /// The source's generation function failed
    #[error("producer failed: {0}")]
    Producer(String),

    /// The sink's consumption or transform function failed
    #[error("consumer failed: {0}")]
    Consumer(String),
}
