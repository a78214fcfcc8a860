use crate::backpressure::{FlowController, StreamConfig};
use crate::buffer::{Chunk, ChunkBuffer};
use crate::error::{Result, StreamError};
use crate::events::Listeners;
use crate::scheduler::TaskQueue;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Observable lifecycle state of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Writes are accepted and consumed as they arrive
    Accepting,
    /// Writes accumulate until uncorked
    Corked,
    /// A dispatched batch is being consumed
    Flushing,
    /// Accounted size is at or above the high-water mark
    Full,
    /// Terminal: no further writes are accepted
    Finished,
}

/// Consumption strategy, injected at construction.
pub trait Consumer: 'static {
    /// Called with one chunk per ordinary write, or the whole corked
    /// backlog as a single batch on uncork. `done` must be fired exactly
    /// once when the chunks have been consumed, either synchronously or
    /// from a task deferred on the engine's queue.
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> Result<()>;

    /// Human-readable strategy name, used in log output
    fn name(&self) -> &str {
        "consumer"
    }
}

type WriteCallback = Box<dyn FnOnce()>;

struct InflightBatch {
    callbacks: Vec<Option<WriteCallback>>,
    bytes: usize,
}

struct SinkInner {
    /// Queued chunks not yet dispatched to the consumer
    buffer: ChunkBuffer,
    /// One completion callback slot per buffered chunk, in write order
    callbacks: VecDeque<Option<WriteCallback>>,
    flow: FlowController,
    /// Bytes accounted: queued plus in flight, released on completion
    accounted: usize,
    corked: u32,
    /// Uncork found two or more accumulated writes; the next dispatch
    /// takes the whole backlog as one batch.
    batch_next: bool,
    consuming: bool,
    drive_scheduled: bool,
    inflight: Option<InflightBatch>,
    ended: bool,
    finished: bool,
}

/// The writable side: accepts chunks, batches them while corked, and emits
/// edge-triggered `Drain` notifications when the accounted size falls back
/// below the high-water mark.
///
/// Handles are cheap clones sharing one engine.
pub struct SinkEngine {
    inner: Arc<Mutex<SinkInner>>,
    consumer: Arc<Mutex<Option<Box<dyn Consumer>>>>,
    queue: TaskQueue,
    drain: Listeners<()>,
    finish: Listeners<()>,
    error: Listeners<StreamError>,
}

impl Clone for SinkEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            consumer: Arc::clone(&self.consumer),
            queue: self.queue.clone(),
            drain: self.drain.clone(),
            finish: self.finish.clone(),
            error: self.error.clone(),
        }
    }
}

/// Handle a consumer fires when a dispatched batch has been consumed.
/// Firing is one-shot; clones share the shot.
pub struct Completion {
    sink: SinkEngine,
    fired: Arc<AtomicBool>,
}

impl Clone for Completion {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            fired: Arc::clone(&self.fired),
        }
    }
}

impl Completion {
    fn new(sink: SinkEngine) -> Self {
        Self {
            sink,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The batch was consumed successfully
    pub fn complete(&self) {
        if self.fired.swap(true, Ordering::Relaxed) {
            return;
        }
        self.sink.finish_batch();
    }

    /// The batch failed; the sink finishes abnormally
    pub fn fail(&self, error: StreamError) {
        if self.fired.swap(true, Ordering::Relaxed) {
            return;
        }
        self.sink.fail(error);
    }
}

impl SinkEngine {
    /// Create a sink with the given consumption strategy
    pub fn new(queue: &TaskQueue, config: StreamConfig, consumer: impl Consumer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                buffer: ChunkBuffer::new(),
                callbacks: VecDeque::new(),
                flow: FlowController::new(config.high_water_mark),
                accounted: 0,
                corked: 0,
                batch_next: false,
                consuming: false,
                drive_scheduled: false,
                inflight: None,
                ended: false,
                finished: false,
            })),
            consumer: Arc::new(Mutex::new(Some(Box::new(consumer)))),
            queue: queue.clone(),
            drain: Listeners::new(),
            finish: Listeners::new(),
            error: Listeners::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SinkState {
        let inner = self.inner.lock();
        if inner.finished {
            SinkState::Finished
        } else if inner.corked > 0 {
            SinkState::Corked
        } else if inner.consuming {
            SinkState::Flushing
        } else if inner.accounted >= inner.flow.high_water_mark() {
            SinkState::Full
        } else {
            SinkState::Accepting
        }
    }

    /// Accounted bytes: queued plus in flight
    pub fn buffered(&self) -> usize {
        self.inner.lock().accounted
    }

    /// Whether the sink has reached its terminal state
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Subscribe to the edge-triggered drain notification
    pub fn on_drain(&self, mut callback: impl FnMut() + 'static) {
        self.drain.subscribe(move |_| callback());
    }

    /// Subscribe to the finish notification
    pub fn on_finish(&self, mut callback: impl FnMut() + 'static) {
        self.finish.subscribe(move |_| callback());
    }

    /// Subscribe to the error notification
    pub fn on_error(&self, callback: impl FnMut(&StreamError) + 'static) {
        self.error.subscribe(callback);
    }

    /// Queue a chunk for consumption. Returns `false` when the buffer was
    /// already at or above the high-water mark, a signal to stop writing
    /// until `Drain`. Writing anyway is permitted; it defeats backpressure
    /// but is not an error.
    pub fn write(&self, chunk: Chunk) -> Result<bool> {
        self.enqueue(chunk, None)
    }

    /// `write` with a completion callback, invoked in write order once the
    /// chunk has been consumed
    pub fn write_with(&self, chunk: Chunk, on_complete: impl FnOnce() + 'static) -> Result<bool> {
        self.enqueue(chunk, Some(Box::new(on_complete)))
    }

    fn enqueue(&self, chunk: Chunk, on_complete: Option<WriteCallback>) -> Result<bool> {
        let (accept, schedule) = {
            let mut inner = self.inner.lock();
            if inner.ended || inner.finished {
                return Err(StreamError::InvalidState("write after end"));
            }
            let pre = inner.accounted;
            inner.accounted += chunk.len();
            inner.buffer.push(chunk);
            inner.callbacks.push_back(on_complete);
            let accept = !inner.flow.should_pause(pre);
            let schedule = inner.corked == 0 && !inner.consuming && !inner.drive_scheduled;
            if schedule {
                inner.drive_scheduled = true;
            }
            (accept, schedule)
        };
        if !accept {
            tracing::trace!("sink at high-water mark");
        }
        if schedule {
            let engine = self.clone();
            self.queue.defer(move || engine.drive());
        }
        Ok(accept)
    }

    /// Defer consumption; subsequent writes accumulate until uncorked.
    /// Cork calls nest and require balanced uncorks.
    pub fn cork(&self) {
        self.inner.lock().corked += 1;
    }

    /// Release one cork level. At depth zero, two or more accumulated
    /// writes are dispatched as a single batched consumption call; exactly
    /// one is dispatched as an ordinary single-chunk call.
    pub fn uncork(&self) {
        let schedule = {
            let mut inner = self.inner.lock();
            match inner.corked {
                0 => false,
                1 => {
                    inner.corked = 0;
                    if inner.buffer.len() >= 2 {
                        inner.batch_next = true;
                    }
                    let schedule =
                        !inner.consuming && !inner.drive_scheduled && !inner.buffer.is_empty();
                    if schedule {
                        inner.drive_scheduled = true;
                    }
                    schedule
                }
                _ => {
                    inner.corked -= 1;
                    false
                }
            }
        };
        if schedule {
            let engine = self.clone();
            self.queue.defer(move || engine.drive());
        }
    }

    /// Refuse further writes, flush anything buffered (releasing any
    /// corks), and fire `Finish` once every prior write's completion
    /// callback has run. An optional final chunk is written first.
    pub fn end(&self, final_chunk: Option<Chunk>) -> Result<()> {
        {
            let inner = self.inner.lock();
            if inner.ended || inner.finished {
                return Err(StreamError::InvalidState("end after end"));
            }
        }
        if let Some(chunk) = final_chunk {
            self.enqueue(chunk, None)?;
        }
        let (schedule, finish_now) = {
            let mut inner = self.inner.lock();
            inner.ended = true;
            if inner.corked > 0 {
                inner.corked = 0;
                if inner.buffer.len() >= 2 {
                    inner.batch_next = true;
                }
            }
            if inner.buffer.is_empty() && !inner.consuming {
                inner.finished = true;
                (false, true)
            } else {
                let schedule =
                    !inner.consuming && !inner.drive_scheduled && !inner.buffer.is_empty();
                if schedule {
                    inner.drive_scheduled = true;
                }
                (schedule, false)
            }
        };
        if finish_now {
            tracing::debug!("sink finished");
            self.finish.notify(&());
        }
        if schedule {
            let engine = self.clone();
            self.queue.defer(move || engine.drive());
        }
        Ok(())
    }

    /// Terminate abnormally: pending and in-flight writes are dropped, no
    /// `Finish` fires, and the error notification is delivered once.
    pub fn fail(&self, error: StreamError) {
        let deliver = {
            let mut inner = self.inner.lock();
            if inner.finished {
                false
            } else {
                inner.finished = true;
                inner.ended = true;
                inner.consuming = false;
                inner.inflight = None;
                inner.buffer.clear();
                inner.callbacks.clear();
                inner.accounted = 0;
                true
            }
        };
        if deliver {
            if self.error.count() == 0 {
                tracing::warn!(error = %error, "unobserved sink error");
            } else {
                tracing::debug!(error = %error, "sink failed");
            }
            self.error.notify(&error);
        }
    }

    /// Dispatch the next pending consumption: the whole backlog after an
    /// uncork batch, otherwise one chunk.
    fn drive(&self) {
        let dispatch = {
            let mut inner = self.inner.lock();
            inner.drive_scheduled = false;
            if inner.consuming || inner.corked > 0 || inner.finished || inner.buffer.is_empty() {
                None
            } else {
                let mut chunks = Vec::new();
                let mut callbacks = Vec::new();
                let batch = inner.batch_next;
                inner.batch_next = false;
                loop {
                    match inner.buffer.pop_chunk() {
                        Some(chunk) => {
                            chunks.push(chunk);
                            callbacks.push(inner.callbacks.pop_front().flatten());
                        }
                        None => break,
                    }
                    if !batch {
                        break;
                    }
                }
                let bytes = chunks.iter().map(|c| c.len()).sum();
                inner.consuming = true;
                inner.inflight = Some(InflightBatch { callbacks, bytes });
                Some(chunks)
            }
        };
        let Some(chunks) = dispatch else {
            return;
        };
        let done = Completion::new(self.clone());
        let taken = self.consumer.lock().take();
        match taken {
            Some(mut consumer) => {
                tracing::trace!(
                    chunks = chunks.len(),
                    consumer = consumer.name(),
                    "sink consuming"
                );
                let result = consumer.consume(chunks, done);
                *self.consumer.lock() = Some(consumer);
                if let Err(error) = result {
                    self.fail(error);
                }
            }
            None => {
                self.inner.lock().consuming = false;
            }
        }
    }

    /// A dispatched batch completed: release its bytes, fan the completion
    /// out to each chunk's callback in write order, then `Drain` if the
    /// accounted size crossed below the mark, then continue the queue, then
    /// `Finish` once ended and empty.
    fn finish_batch(&self) {
        let (callbacks, fire_drain, schedule, fire_finish) = {
            let mut inner = self.inner.lock();
            let Some(batch) = inner.inflight.take() else {
                return;
            };
            inner.consuming = false;
            inner.accounted -= batch.bytes;
            let accounted = inner.accounted;
            let fire_drain = inner.flow.on_drain(accounted);
            let more = !inner.buffer.is_empty() && inner.corked == 0 && !inner.finished;
            let schedule = more && !inner.drive_scheduled;
            if schedule {
                inner.drive_scheduled = true;
            }
            let fire_finish = inner.ended && !inner.finished && inner.buffer.is_empty();
            if fire_finish {
                inner.finished = true;
            }
            (batch.callbacks, fire_drain, schedule, fire_finish)
        };
        for callback in callbacks.into_iter().flatten() {
            callback();
        }
        if fire_drain {
            tracing::trace!("sink drained below high-water mark");
            self.drain.notify(&());
        }
        if schedule {
            let engine = self.clone();
            self.queue.defer(move || engine.drive());
        }
        if fire_finish {
            tracing::debug!("sink finished");
            self.finish.notify(&());
        }
    }
}

/// Accumulates every consumed chunk, completing synchronously
pub struct CollectConsumer {
    chunks: Arc<Mutex<Vec<Chunk>>>,
}

impl CollectConsumer {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the chunks consumed so far
    pub fn collected(&self) -> Arc<Mutex<Vec<Chunk>>> {
        Arc::clone(&self.chunks)
    }
}

impl Default for CollectConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer for CollectConsumer {
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> Result<()> {
        self.chunks.lock().extend(chunks);
        done.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        "collect"
    }
}

/// Wraps a closure as a consumption strategy
pub struct FnConsumer<F>
where
    F: FnMut(Vec<Chunk>, Completion) -> Result<()> + 'static,
{
    name: String,
    func: F,
}

impl<F> FnConsumer<F>
where
    F: FnMut(Vec<Chunk>, Completion) -> Result<()> + 'static,
{
    /// Create a named closure consumer
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Consumer for FnConsumer<F>
where
    F: FnMut(Vec<Chunk>, Completion) -> Result<()> + 'static,
{
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> Result<()> {
        (self.func)(chunks, done)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
