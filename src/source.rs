use crate::backpressure::{FlowController, StreamConfig};
use crate::buffer::{Chunk, ChunkBuffer};
use crate::error::{Result, StreamError};
use crate::events::Listeners;
use crate::scheduler::TaskQueue;
use parking_lot::Mutex;
use std::sync::Arc;

/// Consumption mode of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Consumer-pulled: emitted chunks buffer until `read`
    Paused,
    /// Producer-pushed: emitted chunks go straight to `Data` subscribers
    Flowing,
}

/// Observable lifecycle state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Nothing buffered, no pull in flight
    Idle,
    /// A pull is in flight
    Producing,
    /// Chunks are waiting in the buffer
    Buffered,
    /// The buffer is being consumed
    Draining,
    /// Terminal: no further chunks will be produced
    Ended,
}

/// Chunk generation strategy, injected at construction.
pub trait Producer: 'static {
    /// Called when the engine wants more data. Implementations call
    /// `source.emit` zero or more times and `source.signal_end` once the
    /// stream is exhausted, either synchronously or from a task deferred on
    /// the engine's queue.
    fn pull(&mut self, demand: usize, source: &SourceEngine) -> Result<()>;

    /// Human-readable strategy name, used in log output
    fn name(&self) -> &str {
        "producer"
    }
}

struct SourceInner {
    mode: SourceMode,
    state: SourceState,
    buffer: ChunkBuffer,
    flow: FlowController,
    /// A pull is in flight. Cleared by `emit`/`signal_end`, not by the pull
    /// returning, so a deferred emission is not raced by a second pull.
    producing: bool,
    /// Pipeline backpressure gate: while set, a flowing source buffers
    /// emissions instead of delivering them.
    gated: bool,
    /// A backlog flush is dispatching. Emissions and end signals arriving
    /// from inside a `Data` callback buffer behind it instead of nesting a
    /// second dispatch, which would skip the swapped-out subscriber list.
    flushing: bool,
    /// A pipeline link is attached
    linked: bool,
    ended: bool,
    end_emitted: bool,
}

/// The readable side: a pull-based state machine generating chunks on
/// demand, consumed either by explicit `read` calls (paused mode) or by
/// `Data` subscribers (flowing mode).
///
/// Handles are cheap clones sharing one engine.
pub struct SourceEngine {
    inner: Arc<Mutex<SourceInner>>,
    producer: Arc<Mutex<Option<Box<dyn Producer>>>>,
    queue: TaskQueue,
    readable: Listeners<()>,
    data: Listeners<Chunk>,
    end: Listeners<()>,
    error: Listeners<StreamError>,
}

impl Clone for SourceEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            producer: Arc::clone(&self.producer),
            queue: self.queue.clone(),
            readable: self.readable.clone(),
            data: self.data.clone(),
            end: self.end.clone(),
            error: self.error.clone(),
        }
    }
}

enum Delivery {
    Direct(Chunk),
    Buffered { fire_readable: bool },
}

impl SourceEngine {
    /// Create a source in paused mode with the given generation strategy
    pub fn new(queue: &TaskQueue, config: StreamConfig, producer: impl Producer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SourceInner {
                mode: SourceMode::Paused,
                state: SourceState::Idle,
                buffer: ChunkBuffer::new(),
                flow: FlowController::new(config.high_water_mark),
                producing: false,
                gated: false,
                flushing: false,
                linked: false,
                ended: false,
                end_emitted: false,
            })),
            producer: Arc::new(Mutex::new(Some(Box::new(producer)))),
            queue: queue.clone(),
            readable: Listeners::new(),
            data: Listeners::new(),
            end: Listeners::new(),
            error: Listeners::new(),
        }
    }

    /// Current consumption mode
    pub fn mode(&self) -> SourceMode {
        self.inner.lock().mode
    }

    /// Current lifecycle state
    pub fn state(&self) -> SourceState {
        self.inner.lock().state
    }

    /// Accounted bytes waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.inner.lock().buffer.peek_size()
    }

    /// Subscribe to the edge-triggered readable notification: fires once
    /// per empty-to-non-empty buffer transition in paused mode.
    pub fn on_readable(&self, mut callback: impl FnMut() + 'static) {
        self.readable.subscribe(move |_| callback());
    }

    /// Subscribe a continuous data consumer. Registering one switches the
    /// source to flowing mode, flushing any buffered backlog first.
    pub fn on_data(&self, callback: impl FnMut(&Chunk) + 'static) {
        self.data.subscribe(callback);
        self.resume();
    }

    /// Subscribe to the end notification
    pub fn on_end(&self, mut callback: impl FnMut() + 'static) {
        self.end.subscribe(move |_| callback());
    }

    /// Subscribe to the error notification
    pub fn on_error(&self, callback: impl FnMut(&StreamError) + 'static) {
        self.error.subscribe(callback);
    }

    /// Ask the engine to produce. No-op while a pull is already in flight,
    /// after the stream ended, or while a flowing source is gated.
    pub fn request_more(&self, demand: usize) {
        let run = {
            let mut inner = self.inner.lock();
            if inner.ended
                || inner.producing
                || (inner.mode == SourceMode::Flowing && inner.gated)
            {
                false
            } else {
                inner.producing = true;
                inner.state = SourceState::Producing;
                true
            }
        };
        if !run {
            return;
        }
        let taken = self.producer.lock().take();
        match taken {
            Some(mut producer) => {
                let result = producer.pull(demand, self);
                *self.producer.lock() = Some(producer);
                if let Err(error) = result {
                    self.fail(error);
                }
            }
            None => {
                self.inner.lock().producing = false;
            }
        }
    }

    /// Produce one chunk into the stream. In paused mode (or while gated)
    /// the chunk buffers; in flowing mode it is delivered to `Data`
    /// subscribers and the next pull is deferred. Returns whether buffered
    /// capacity remains below the high-water mark.
    pub fn emit(&self, chunk: Chunk) -> Result<bool> {
        let (delivery, more) = {
            let mut inner = self.inner.lock();
            if inner.ended {
                return Err(StreamError::InvalidState("emit after end"));
            }
            inner.producing = false;
            if inner.mode == SourceMode::Flowing
                && !inner.gated
                && !inner.flushing
                && inner.buffer.is_empty()
            {
                inner.state = SourceState::Draining;
                (Delivery::Direct(chunk), true)
            } else {
                let was_empty = inner.buffer.is_empty();
                let total = inner.buffer.push(chunk);
                inner.state = SourceState::Buffered;
                let fire_readable = was_empty && inner.mode == SourceMode::Paused;
                (Delivery::Buffered { fire_readable }, inner.flow.has_capacity(total))
            }
        };
        match delivery {
            Delivery::Direct(chunk) => {
                tracing::trace!(bytes = chunk.len(), "source delivering chunk");
                self.data.notify(&chunk);
                let sustain = {
                    let mut inner = self.inner.lock();
                    if inner.state == SourceState::Draining {
                        inner.state = SourceState::Idle;
                    }
                    !inner.ended
                        && !inner.producing
                        && !inner.gated
                        && inner.mode == SourceMode::Flowing
                };
                if sustain {
                    let engine = self.clone();
                    self.queue.defer(move || {
                        let demand = engine.demand();
                        engine.request_more(demand);
                    });
                }
            }
            Delivery::Buffered { fire_readable } => {
                if fire_readable {
                    self.readable.notify(&());
                }
            }
        }
        Ok(more)
    }

    /// Mark the stream exhausted. In flowing mode `End` fires as soon as
    /// the backlog is clear; in paused mode it fires on the read that
    /// drains the buffer. Signaling twice is an error.
    pub fn signal_end(&self) -> Result<()> {
        let fire_now = {
            let mut inner = self.inner.lock();
            if inner.ended {
                return Err(StreamError::InvalidState("end signaled twice"));
            }
            inner.ended = true;
            inner.producing = false;
            inner.state = SourceState::Ended;
            let fire = inner.mode == SourceMode::Flowing
                && !inner.gated
                && !inner.flushing
                && inner.buffer.is_empty()
                && !inner.end_emitted;
            if fire {
                inner.end_emitted = true;
            }
            fire
        };
        if fire_now {
            tracing::debug!("source ended");
            self.end.notify(&());
        }
        Ok(())
    }

    /// Pull buffered data in paused mode: up to `max` bytes, or everything
    /// when `max` is `None`. Returns `None` when nothing is buffered; for a
    /// stream that has not ended this also requests a deferred refill, and
    /// once an ended stream's buffer empties the `End` notification is
    /// delivered and every later call returns `None`. In flowing mode this
    /// returns `None` without changing mode.
    pub fn read(&self, max: Option<usize>) -> Option<Chunk> {
        enum After {
            Nothing,
            FireEnd,
            Refill(usize),
        }
        let (out, after) = {
            let mut inner = self.inner.lock();
            if inner.mode == SourceMode::Flowing {
                return None;
            }
            match inner.buffer.pop(max) {
                Some(chunk) => {
                    let after = if inner.buffer.is_empty() {
                        if inner.ended && !inner.end_emitted {
                            inner.end_emitted = true;
                            After::FireEnd
                        } else {
                            if !inner.ended {
                                inner.state = SourceState::Idle;
                            }
                            After::Nothing
                        }
                    } else {
                        inner.state = SourceState::Draining;
                        After::Nothing
                    };
                    (Some(chunk), after)
                }
                None => {
                    if inner.ended {
                        if inner.end_emitted {
                            (None, After::Nothing)
                        } else {
                            inner.end_emitted = true;
                            (None, After::FireEnd)
                        }
                    } else if inner.producing {
                        (None, After::Nothing)
                    } else {
                        (None, After::Refill(inner.flow.high_water_mark().max(1)))
                    }
                }
            }
        };
        match after {
            After::FireEnd => {
                let end = self.end.clone();
                self.queue.defer(move || {
                    tracing::debug!("source ended");
                    end.notify(&());
                });
            }
            After::Refill(demand) => {
                let engine = self.clone();
                self.queue.defer(move || engine.request_more(demand));
            }
            After::Nothing => {}
        }
        out
    }

    /// Switch to flowing mode, flushing any buffered backlog to `Data`
    /// subscribers in order before production resumes.
    pub fn resume(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.mode == SourceMode::Paused {
                inner.mode = SourceMode::Flowing;
                tracing::debug!("source resumed");
            }
        }
        self.flush_flowing();
    }

    /// Switch back to paused mode. Not permitted while a pipeline link is
    /// attached; the link must be severed first.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.linked {
            return Err(StreamError::InvalidState("pause while piped"));
        }
        inner.mode = SourceMode::Paused;
        Ok(())
    }

    /// Terminate abnormally: the stream ends without a normal `End` and the
    /// error notification is delivered once. No-op after a terminal state.
    pub fn fail(&self, error: StreamError) {
        let deliver = {
            let mut inner = self.inner.lock();
            if inner.ended {
                false
            } else {
                inner.ended = true;
                inner.end_emitted = true;
                inner.producing = false;
                inner.state = SourceState::Ended;
                true
            }
        };
        if deliver {
            if self.error.count() == 0 {
                tracing::warn!(error = %error, "unobserved source error");
            } else {
                tracing::debug!(error = %error, "source failed");
            }
            self.error.notify(&error);
        }
    }

    pub(crate) fn gate(&self) {
        let mut inner = self.inner.lock();
        if !inner.gated {
            inner.gated = true;
            tracing::trace!("source gated by sink backpressure");
        }
    }

    pub(crate) fn ungate(&self) {
        let flush = {
            let mut inner = self.inner.lock();
            if inner.gated {
                inner.gated = false;
                true
            } else {
                false
            }
        };
        if flush {
            tracing::trace!("source ungated");
            self.flush_flowing();
        }
    }

    pub(crate) fn attach_link(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.linked {
            return Err(StreamError::InvalidState("source already piped"));
        }
        inner.linked = true;
        Ok(())
    }

    pub(crate) fn detach_link(&self) {
        let mut inner = self.inner.lock();
        inner.linked = false;
        inner.gated = false;
        inner.mode = SourceMode::Paused;
    }

    /// Deliver buffered chunks to `Data` subscribers until the backlog is
    /// empty, the gate closes, or the mode changes; then deliver a pending
    /// end or sustain production.
    fn flush_flowing(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.flushing {
                return;
            }
            inner.flushing = true;
        }
        loop {
            let chunk = {
                let mut inner = self.inner.lock();
                if inner.mode != SourceMode::Flowing || inner.gated {
                    inner.flushing = false;
                    return;
                }
                let chunk = inner.buffer.pop_chunk();
                if chunk.is_some() {
                    inner.state = SourceState::Draining;
                }
                chunk
            };
            match chunk {
                Some(chunk) => self.data.notify(&chunk),
                None => break,
            }
        }
        let (fire_end, sustain) = {
            let mut inner = self.inner.lock();
            inner.flushing = false;
            if inner.mode != SourceMode::Flowing || inner.gated || !inner.buffer.is_empty() {
                (false, false)
            } else if inner.ended {
                let fire = !inner.end_emitted;
                if fire {
                    inner.end_emitted = true;
                }
                (fire, false)
            } else {
                if inner.state == SourceState::Draining {
                    inner.state = SourceState::Idle;
                }
                (false, !inner.producing)
            }
        };
        if fire_end {
            tracing::debug!("source ended");
            self.end.notify(&());
        }
        if sustain {
            let engine = self.clone();
            self.queue.defer(move || {
                let demand = engine.demand();
                engine.request_more(demand);
            });
        }
    }

    fn demand(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .flow
            .high_water_mark()
            .saturating_sub(inner.buffer.peek_size())
            .max(1)
    }
}

/// Produces chunks from an iterator, one per pull, then ends the stream
pub struct IterProducer<I> {
    chunks: I,
}

impl<I> IterProducer<I>
where
    I: Iterator<Item = Chunk> + 'static,
{
    /// Create a producer over anything yielding chunks
    pub fn new(chunks: impl IntoIterator<Item = Chunk, IntoIter = I>) -> Self {
        Self {
            chunks: chunks.into_iter(),
        }
    }
}

impl<I> Producer for IterProducer<I>
where
    I: Iterator<Item = Chunk> + 'static,
{
    fn pull(&mut self, _demand: usize, source: &SourceEngine) -> Result<()> {
        match self.chunks.next() {
            Some(chunk) => {
                source.emit(chunk)?;
            }
            None => {
                source.signal_end()?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "iter"
    }
}

/// Never produces on its own; data is pushed externally via `emit`
pub struct InertProducer;

impl Producer for InertProducer {
    fn pull(&mut self, _demand: usize, _source: &SourceEngine) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "inert"
    }
}
