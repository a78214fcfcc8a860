use chunkflow::{
    Chunk, Completion, Consumer, IterProducer, Pipeline, Result as StreamResult, SinkEngine,
    SourceEngine, StreamConfig, TaskQueue,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

/// Completes each batch on a later queue turn, so the sink stays busy and
/// the source spends time gated.
struct DeferringConsumer {
    queue: TaskQueue,
    consumed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl Consumer for DeferringConsumer {
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> StreamResult<()> {
        self.consumed
            .fetch_add(chunks.len(), std::sync::atomic::Ordering::Relaxed);
        self.queue.defer(move || done.complete());
        Ok(())
    }

    fn name(&self) -> &str {
        "deferring"
    }
}

fn benchmark_gated_flow(c: &mut Criterion) {
    c.bench_function("gated_flow_1000_chunks_hwm_128", |b| {
        b.iter(|| {
            let queue = TaskQueue::new();
            let chunks: Vec<Vec<u8>> = (0..1000).map(|i| vec![i as u8; 64]).collect();
            let source = SourceEngine::new(
                &queue,
                StreamConfig::default(),
                IterProducer::new(black_box(chunks)),
            );
            let consumed = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let sink = SinkEngine::new(
                &queue,
                StreamConfig::with_high_water_mark(128),
                DeferringConsumer {
                    queue: queue.clone(),
                    consumed: std::sync::Arc::clone(&consumed),
                },
            );

            Pipeline::new()
                .connect(&source, &sink)
                .expect("connect failed");
            queue.run_until_idle();

            assert_eq!(consumed.load(std::sync::atomic::Ordering::Relaxed), 1000);
        });
    });
}

fn benchmark_ungated_flow(c: &mut Criterion) {
    c.bench_function("ungated_flow_1000_chunks_hwm_1m", |b| {
        b.iter(|| {
            let queue = TaskQueue::new();
            let chunks: Vec<Vec<u8>> = (0..1000).map(|i| vec![i as u8; 64]).collect();
            let source = SourceEngine::new(
                &queue,
                StreamConfig::default(),
                IterProducer::new(black_box(chunks)),
            );
            let consumed = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let sink = SinkEngine::new(
                &queue,
                StreamConfig::with_high_water_mark(1 << 20),
                DeferringConsumer {
                    queue: queue.clone(),
                    consumed: std::sync::Arc::clone(&consumed),
                },
            );

            Pipeline::new()
                .connect(&source, &sink)
                .expect("connect failed");
            queue.run_until_idle();

            assert_eq!(consumed.load(std::sync::atomic::Ordering::Relaxed), 1000);
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_gated_flow, benchmark_ungated_flow
);
criterion_main!(benches);
