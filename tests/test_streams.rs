use chunkflow::{
    Chunk, CollectConsumer, Completion, Consumer, FnConsumer, InertProducer, IterProducer,
    Pipeline, PassthroughTransform, Result as StreamResult, SinkEngine, SourceEngine,
    SourceMode, StreamConfig, StreamError, TaskQueue, TransformStage,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records every consumption call and holds its completion until the test
/// fires it, simulating a slow downstream.
struct ManualConsumer {
    calls: Arc<Mutex<Vec<Vec<Chunk>>>>,
    completions: Arc<Mutex<VecDeque<Completion>>>,
}

impl ManualConsumer {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            completions: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn calls(&self) -> Arc<Mutex<Vec<Vec<Chunk>>>> {
        Arc::clone(&self.calls)
    }

    fn completions(&self) -> Arc<Mutex<VecDeque<Completion>>> {
        Arc::clone(&self.completions)
    }
}

impl Consumer for ManualConsumer {
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> StreamResult<()> {
        self.calls.lock().push(chunks);
        self.completions.lock().push_back(done);
        Ok(())
    }

    fn name(&self) -> &str {
        "manual"
    }
}

fn chunk(text: &str) -> Chunk {
    text.as_bytes().to_vec()
}

#[test]
fn test_prepushed_source_reads_everything_then_misses() {
    let queue = TaskQueue::new();
    let source = SourceEngine::new(
        &queue,
        StreamConfig::with_high_water_mark(6),
        InertProducer,
    );

    // pushes may exceed the high-water mark; the mark is advisory
    assert!(!source.emit(chunk("prepush")).unwrap());
    assert!(!source.emit(chunk("prepush1")).unwrap());
    assert!(!source.emit(chunk("prepush2")).unwrap());
    assert_eq!(source.buffered(), 23);

    assert_eq!(source.read(None), Some(chunk("prepushprepush1prepush2")));
    // buffer empty but not ended: a miss, not an end
    assert_eq!(source.read(None), None);
}

#[test]
fn test_corked_writes_flush_as_one_batch_with_ordered_callbacks() {
    let queue = TaskQueue::new();
    let consumer = ManualConsumer::new();
    let calls = consumer.calls();
    let completions = consumer.completions();
    let sink = SinkEngine::new(&queue, StreamConfig::default(), consumer);

    let order = Arc::new(Mutex::new(Vec::new()));
    sink.cork();
    for label in ["5", "4", "3", "2", "1"] {
        let order = Arc::clone(&order);
        sink.write_with(chunk(label), move || order.lock().push(label))
            .unwrap();
    }
    queue.run_until_idle();
    assert!(calls.lock().is_empty());

    sink.uncork();
    queue.run_until_idle();

    // exactly one batched call carrying all five chunks in write order
    {
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        let expected: Vec<Chunk> = ["5", "4", "3", "2", "1"].iter().map(|s| chunk(s)).collect();
        assert_eq!(calls[0], expected);
    }
    assert!(order.lock().is_empty());

    completions.lock().pop_front().unwrap().complete();
    assert_eq!(*order.lock(), vec!["5", "4", "3", "2", "1"]);
}

#[test]
fn test_third_write_refused_and_drain_fires_once() {
    let queue = TaskQueue::new();
    let consumer = ManualConsumer::new();
    let completions = consumer.completions();
    let sink = SinkEngine::new(&queue, StreamConfig::with_high_water_mark(2), consumer);

    let drains = Arc::new(AtomicUsize::new(0));
    let drain_count = Arc::clone(&drains);
    sink.on_drain(move || {
        drain_count.fetch_add(1, Ordering::Relaxed);
    });

    let returns: Vec<bool> = ["5", "4", "3", "2", "1"]
        .iter()
        .map(|label| sink.write(chunk(label)).unwrap())
        .collect();
    assert_eq!(returns, vec![true, true, false, false, false]);

    // writing while above the mark keeps returning false
    assert!(!sink.write(chunk("0")).unwrap());

    // complete consumption one chunk at a time
    loop {
        queue.run_until_idle();
        let Some(done) = completions.lock().pop_front() else {
            break;
        };
        done.complete();
    }

    assert_eq!(drains.load(Ordering::Relaxed), 1);
    assert_eq!(sink.buffered(), 0);
    // drained below the mark: writes are accepted again
    assert!(sink.write(chunk("6")).unwrap());
}

#[test]
fn test_flowing_source_ends_right_after_last_chunk() {
    let queue = TaskQueue::new();
    let source = SourceEngine::new(
        &queue,
        StreamConfig::default(),
        IterProducer::new(vec![chunk("alpha"), chunk("beta")]),
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    let readable_events = Arc::clone(&events);
    source.on_readable(move || readable_events.lock().push("readable".to_string()));
    let end_events = Arc::clone(&events);
    source.on_end(move || end_events.lock().push("end".to_string()));
    let data_events = Arc::clone(&events);
    source.on_data(move |chunk| {
        data_events
            .lock()
            .push(format!("data:{}", String::from_utf8_lossy(chunk)));
    });

    queue.run_until_idle();

    // end arrives directly after the last delivery, with no readable in between
    assert_eq!(
        *events.lock(),
        vec!["data:alpha", "data:beta", "end"]
    );
}

#[test]
fn test_identity_transform_preserves_order_and_count() {
    let queue = TaskQueue::new();
    let pipeline = Pipeline::new();
    let chunks: Vec<Chunk> = (0u8..8).map(|i| vec![i]).collect();
    let source = SourceEngine::new(
        &queue,
        StreamConfig::default(),
        IterProducer::new(chunks.clone()),
    );
    let stage = TransformStage::new(&queue, StreamConfig::default(), PassthroughTransform);
    let collector = CollectConsumer::new();
    let collected = collector.collected();
    let sink = SinkEngine::new(&queue, StreamConfig::default(), collector);

    pipeline.connect_through(&source, &stage, &sink).unwrap();
    queue.run_until_idle();

    assert_eq!(*collected.lock(), chunks);
    assert!(sink.is_finished());
}

#[test]
fn test_backpressure_bounds_sink_buffer() {
    let queue = TaskQueue::new();
    let pipeline = Pipeline::new();
    let source = SourceEngine::new(&queue, StreamConfig::default(), InertProducer);
    let consumer = ManualConsumer::new();
    let calls = consumer.calls();
    let completions = consumer.completions();
    let sink = SinkEngine::new(&queue, StreamConfig::with_high_water_mark(2), consumer);
    pipeline.connect(&source, &sink).unwrap();

    for label in ["a", "b", "c", "d", "e"] {
        source.emit(chunk(label)).unwrap();
    }

    // the sink holds at most the mark plus the one chunk that crossed it;
    // the rest waits at the gated source
    assert_eq!(sink.buffered(), 3);
    assert_eq!(source.buffered(), 2);

    source.signal_end().unwrap();
    loop {
        queue.run_until_idle();
        let Some(done) = completions.lock().pop_front() else {
            break;
        };
        done.complete();
    }

    let forwarded: Vec<Chunk> = calls.lock().iter().flatten().cloned().collect();
    let expected: Vec<Chunk> = ["a", "b", "c", "d", "e"].iter().map(|s| chunk(s)).collect();
    assert_eq!(forwarded, expected);
    assert!(sink.is_finished());
}

#[test]
fn test_sink_error_propagates_to_source_and_severs_link() {
    let queue = TaskQueue::new();
    let pipeline = Pipeline::new();
    let source = SourceEngine::new(&queue, StreamConfig::default(), InertProducer);
    let sink = SinkEngine::new(
        &queue,
        StreamConfig::default(),
        FnConsumer::new("broken", |_chunks, _done| {
            Err(StreamError::Consumer("disk full".into()))
        }),
    );

    let source_errors = Arc::new(AtomicUsize::new(0));
    let sink_errors = Arc::new(AtomicUsize::new(0));
    let source_count = Arc::clone(&source_errors);
    source.on_error(move |_| {
        source_count.fetch_add(1, Ordering::Relaxed);
    });
    let sink_count = Arc::clone(&sink_errors);
    sink.on_error(move |_| {
        sink_count.fetch_add(1, Ordering::Relaxed);
    });

    let link = pipeline.connect(&source, &sink).unwrap();
    source.emit(chunk("payload")).unwrap();
    queue.run_until_idle();

    assert_eq!(sink_errors.load(Ordering::Relaxed), 1);
    assert_eq!(source_errors.load(Ordering::Relaxed), 1);
    assert!(!link.is_active());
    assert_eq!(source.mode(), SourceMode::Paused);
}

#[test]
fn test_pause_requires_severed_link() {
    let queue = TaskQueue::new();
    let pipeline = Pipeline::new();
    let source = SourceEngine::new(&queue, StreamConfig::default(), InertProducer);
    let sink = SinkEngine::new(&queue, StreamConfig::default(), CollectConsumer::new());
    let link = pipeline.connect(&source, &sink).unwrap();

    assert_eq!(
        source.pause(),
        Err(StreamError::InvalidState("pause while piped"))
    );
    link.disconnect();
    assert!(source.pause().is_ok());
}

#[test]
fn test_end_through_pipeline_finishes_sink_after_callbacks() {
    let queue = TaskQueue::new();
    let pipeline = Pipeline::new();
    let source = SourceEngine::new(
        &queue,
        StreamConfig::default(),
        IterProducer::new(vec![chunk("only")]),
    );
    let collector = CollectConsumer::new();
    let collected = collector.collected();
    let sink = SinkEngine::new(&queue, StreamConfig::default(), collector);

    let finished = Arc::new(AtomicUsize::new(0));
    let finish_count = Arc::clone(&finished);
    sink.on_finish(move || {
        finish_count.fetch_add(1, Ordering::Relaxed);
    });

    pipeline.connect(&source, &sink).unwrap();
    queue.run_until_idle();

    assert_eq!(*collected.lock(), vec![chunk("only")]);
    assert_eq!(finished.load(Ordering::Relaxed), 1);
}

#[test]
fn test_metrics_observe_forwarding_and_stalls() {
    let queue = TaskQueue::new();
    let metrics = chunkflow::StreamMetrics::new();
    let pipeline = Pipeline::new().with_metrics(metrics.clone());
    let source = SourceEngine::new(&queue, StreamConfig::default(), InertProducer);
    let consumer = ManualConsumer::new();
    let completions = consumer.completions();
    let sink = SinkEngine::new(&queue, StreamConfig::with_high_water_mark(2), consumer);
    pipeline.connect(&source, &sink).unwrap();

    for label in ["a", "b", "c", "d"] {
        source.emit(chunk(label)).unwrap();
    }
    loop {
        queue.run_until_idle();
        let Some(done) = completions.lock().pop_front() else {
            break;
        };
        done.complete();
    }

    assert_eq!(metrics.total_chunks(), 4);
    assert_eq!(metrics.total_bytes(), 4);
    assert!(metrics.total_stalls() >= 1);
    assert!(metrics.total_drains() >= 1);
}
