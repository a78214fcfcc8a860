//! A backpressure-aware, dual-mode streaming data pipeline.
//!
//! Chunks flow source → optional transform → sink; backpressure flows the
//! other way. A source is either paused (consumer-pulled via `read`) or
//! flowing (producer-pushed to `Data` subscribers); a sink buffers writes,
//! batches them while corked, and fires an edge-triggered `Drain` when its
//! buffered size falls back below the high-water mark. Everything runs on a
//! single-threaded cooperative task queue: "asynchronous" work is a
//! deferred task, never a second thread.
//!
//! # Features
//!
//! - Dual-mode readable side: on-demand pull or continuous push
//! - Cork/uncork write batching with FIFO completion callbacks
//! - Edge-triggered `Readable` and `Drain` notifications
//! - Transform stages with strict one-at-a-time chunk ordering
//! - Pipeline links that propagate backpressure, end, and errors both ways
//! - Optional per-link metrics: throughput, stalls, chunk-size percentiles
//!
//! # Example
//!
//! ```ignore
//! use chunkflow::{
//!     CollectConsumer, IterProducer, Pipeline, SinkEngine, SourceEngine,
//!     StreamConfig, TaskQueue,
//! };
//!
//! let queue = TaskQueue::new();
//! let source = SourceEngine::new(
//!     &queue,
//!     StreamConfig::default(),
//!     IterProducer::new(vec![b"hello".to_vec(), b"world".to_vec()]),
//! );
//! let collector = CollectConsumer::new();
//! let collected = collector.collected();
//! let sink = SinkEngine::new(&queue, StreamConfig::default(), collector);
//!
//! Pipeline::new().connect(&source, &sink)?;
//! queue.run_until_idle();
//! // collected now holds both chunks, in order
//! ```

pub mod backpressure;
pub mod buffer;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod transform;

// Re-exports for convenience
pub use backpressure::{FlowController, StreamConfig, DEFAULT_HIGH_WATER_MARK};
pub use buffer::{Chunk, ChunkBuffer};
pub use error::{Result, StreamError};
pub use events::Listeners;
pub use metrics::{ChunkSizeTracker, MetricsSnapshot, StreamMetrics};
pub use pipeline::{Pipeline, PipelineLink};
pub use scheduler::TaskQueue;
pub use sink::{CollectConsumer, Completion, Consumer, FnConsumer, SinkEngine, SinkState};
pub use source::{
    InertProducer, IterProducer, Producer, SourceEngine, SourceMode, SourceState,
};
pub use transform::{
    FilterTransform, MapTransform, PassthroughTransform, Transform, TransformContext,
    TransformStage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
