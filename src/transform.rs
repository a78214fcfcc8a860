use crate::backpressure::StreamConfig;
use crate::buffer::Chunk;
use crate::error::{Result, StreamError};
use crate::scheduler::TaskQueue;
use crate::sink::{Completion, Consumer, SinkEngine};
use crate::source::{InertProducer, SourceEngine};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-chunk mapping strategy for a transform stage.
pub trait Transform: 'static {
    /// Process one input chunk: call `ctx.emit` zero or more times, then
    /// `ctx.complete` (or `ctx.fail`) exactly once, either synchronously or
    /// from a deferred task. The next queued input chunk is not processed
    /// until the completion fires.
    fn transform(&mut self, chunk: Chunk, ctx: &TransformContext) -> Result<()>;

    /// Called once after the input side finishes, before the output side
    /// signals `End`; may emit trailing chunks from accumulated state and
    /// must complete `ctx` like `transform`. The default completes with no
    /// trailing output.
    fn flush(&mut self, ctx: &TransformContext) -> Result<()> {
        ctx.complete();
        Ok(())
    }

    /// Human-readable strategy name, used in log output
    fn name(&self) -> &str {
        "transform"
    }
}

/// Emission and completion surface handed to a `Transform`.
///
/// Clones share the one-shot completion, so an asynchronous transform can
/// move a clone into a deferred task.
pub struct TransformContext {
    output: SourceEngine,
    completed: Arc<AtomicBool>,
    on_complete: Arc<dyn Fn()>,
    on_fail: Arc<dyn Fn(StreamError)>,
}

impl Clone for TransformContext {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
            completed: Arc::clone(&self.completed),
            on_complete: Arc::clone(&self.on_complete),
            on_fail: Arc::clone(&self.on_fail),
        }
    }
}

impl TransformContext {
    /// Emit one output chunk for the current input
    pub fn emit(&self, chunk: Chunk) -> Result<bool> {
        self.output.emit(chunk)
    }

    /// Signal that the current input chunk is fully processed
    pub fn complete(&self) {
        if self.completed.swap(true, Ordering::Relaxed) {
            return;
        }
        (self.on_complete)();
    }

    /// Abort the stage with an error
    pub fn fail(&self, error: StreamError) {
        if self.completed.swap(true, Ordering::Relaxed) {
            return;
        }
        (self.on_fail)(error);
    }
}

struct DriverState {
    transform: Option<Box<dyn Transform>>,
    pending: VecDeque<Chunk>,
    batch_done: Option<Completion>,
    /// A transform call's completion is outstanding
    busy: bool,
}

/// Feeds queued input chunks through the transform one at a time. The
/// continuation after each completion re-enters through the task queue,
/// never recursively, which is what keeps the ordering strict.
struct TransformDriver {
    state: Arc<Mutex<DriverState>>,
    output: SourceEngine,
    queue: TaskQueue,
}

impl Clone for TransformDriver {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            output: self.output.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl Consumer for TransformDriver {
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.pending.extend(chunks);
            state.batch_done = Some(done);
        }
        self.step();
        Ok(())
    }

    fn name(&self) -> &str {
        "transform-driver"
    }
}

enum Step {
    Chunk(Chunk),
    Done(Completion),
    Idle,
}

impl TransformDriver {
    fn step(&self) {
        let step = {
            let mut state = self.state.lock();
            if state.busy {
                Step::Idle
            } else if let Some(chunk) = state.pending.pop_front() {
                state.busy = true;
                Step::Chunk(chunk)
            } else if let Some(done) = state.batch_done.take() {
                Step::Done(done)
            } else {
                Step::Idle
            }
        };
        match step {
            Step::Chunk(chunk) => {
                let ctx = self.chunk_context();
                let taken = self.state.lock().transform.take();
                if let Some(mut transform) = taken {
                    let result = transform.transform(chunk, &ctx);
                    self.state.lock().transform = Some(transform);
                    if let Err(error) = result {
                        ctx.fail(error);
                    }
                }
            }
            Step::Done(done) => done.complete(),
            Step::Idle => {}
        }
    }

    fn chunk_context(&self) -> TransformContext {
        let completer = self.clone();
        let failer = self.clone();
        TransformContext {
            output: self.output.clone(),
            completed: Arc::new(AtomicBool::new(false)),
            on_complete: Arc::new(move || {
                completer.state.lock().busy = false;
                let driver = completer.clone();
                completer.queue.defer(move || driver.step());
            }),
            on_fail: Arc::new(move |error| {
                let done = failer.state.lock().batch_done.take();
                match done {
                    Some(done) => done.fail(error),
                    None => failer.output.fail(error),
                }
            }),
        }
    }

    /// Run the flush hook, then end the output side
    fn run_flush(&self) {
        let output = self.output.clone();
        let end_output = output.clone();
        let fail_output = output.clone();
        let ctx = TransformContext {
            output,
            completed: Arc::new(AtomicBool::new(false)),
            on_complete: Arc::new(move || {
                let _ = end_output.signal_end();
            }),
            on_fail: Arc::new(move |error| fail_output.fail(error)),
        };
        let taken = self.state.lock().transform.take();
        if let Some(mut transform) = taken {
            tracing::trace!(transform = transform.name(), "transform flushing");
            let result = transform.flush(&ctx);
            self.state.lock().transform = Some(transform);
            if let Err(error) = result {
                ctx.fail(error);
            }
        }
    }
}

/// A SinkEngine-compatible input composed with a SourceEngine-compatible
/// output, applying a one-to-zero-or-more chunk mapping in between.
pub struct TransformStage {
    input: SinkEngine,
    output: SourceEngine,
}

impl TransformStage {
    /// Create a stage around the given mapping strategy
    pub fn new(queue: &TaskQueue, config: StreamConfig, transform: impl Transform) -> Self {
        let output = SourceEngine::new(queue, config, InertProducer);
        let driver = TransformDriver {
            state: Arc::new(Mutex::new(DriverState {
                transform: Some(Box::new(transform)),
                pending: VecDeque::new(),
                batch_done: None,
                busy: false,
            })),
            output: output.clone(),
            queue: queue.clone(),
        };
        let input = SinkEngine::new(queue, config, driver.clone());

        // input finished: flush on its own queue turn, then end the output
        let flush_driver = driver.clone();
        let flush_queue = queue.clone();
        input.on_finish(move || {
            let driver = flush_driver.clone();
            flush_queue.defer(move || driver.run_flush());
        });

        // an input-side failure surfaces on the output side too
        let error_output = output.clone();
        input.on_error(move |error| error_output.fail(error.clone()));

        Self { input, output }
    }

    /// The writable input side
    pub fn sink(&self) -> &SinkEngine {
        &self.input
    }

    /// The readable output side
    pub fn source(&self) -> &SourceEngine {
        &self.output
    }
}

/// Forwards every chunk unchanged
pub struct PassthroughTransform;

impl Transform for PassthroughTransform {
    fn transform(&mut self, chunk: Chunk, ctx: &TransformContext) -> Result<()> {
        ctx.emit(chunk)?;
        ctx.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Maps each chunk through a closure
pub struct MapTransform<F>
where
    F: FnMut(Chunk) -> Result<Chunk> + 'static,
{
    name: String,
    mapper: F,
}

impl<F> MapTransform<F>
where
    F: FnMut(Chunk) -> Result<Chunk> + 'static,
{
    /// Create a named mapping transform
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<F> Transform for MapTransform<F>
where
    F: FnMut(Chunk) -> Result<Chunk> + 'static,
{
    fn transform(&mut self, chunk: Chunk, ctx: &TransformContext) -> Result<()> {
        let mapped = (self.mapper)(chunk)?;
        ctx.emit(mapped)?;
        ctx.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Forwards only the chunks matching a predicate
pub struct FilterTransform<F>
where
    F: Fn(&[u8]) -> bool + 'static,
{
    name: String,
    predicate: F,
}

impl<F> FilterTransform<F>
where
    F: Fn(&[u8]) -> bool + 'static,
{
    /// Create a named filtering transform
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Transform for FilterTransform<F>
where
    F: Fn(&[u8]) -> bool + 'static,
{
    fn transform(&mut self, chunk: Chunk, ctx: &TransformContext) -> Result<()> {
        if (self.predicate)(&chunk) {
            ctx.emit(chunk)?;
        }
        ctx.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
