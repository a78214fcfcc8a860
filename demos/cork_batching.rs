//! Cork/uncork batching and drain signaling, step by step
//!
//! Writes five chunks into a corked sink, uncorks to deliver them as one
//! batch, then repeats against a tiny high-water mark to show the refused
//! writes and the single drain notification.
//!
//! Usage: cargo run --example cork_batching

use chunkflow::{
    Chunk, Completion, Consumer, Result as StreamResult, SinkEngine, StreamConfig, TaskQueue,
};

/// Prints every consumption call, showing single writes versus batches
struct AnnouncingConsumer;

impl Consumer for AnnouncingConsumer {
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> StreamResult<()> {
        if chunks.len() == 1 {
            println!("  consumer received one chunk: {}", render(&chunks[0]));
        } else {
            println!("  consumer received a batch of {} chunks:", chunks.len());
            for chunk in &chunks {
                println!("    {}", render(chunk));
            }
        }
        done.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        "announcing"
    }
}

fn render(chunk: &[u8]) -> String {
    String::from_utf8_lossy(chunk).to_string()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let queue = TaskQueue::new();

    println!("corked sink: five writes accumulate, uncork flushes one batch");
    let sink = SinkEngine::new(&queue, StreamConfig::default(), AnnouncingConsumer);
    sink.cork();
    for label in ["5", "4", "3", "2", "1"] {
        sink.write_with(label.as_bytes().to_vec(), move || {
            println!("  write {} completed", label);
        })?;
    }
    sink.uncork();
    queue.run_until_idle();

    println!();
    println!("small high-water mark: refused writes, then a single drain");
    let sink = SinkEngine::new(
        &queue,
        StreamConfig::with_high_water_mark(2),
        AnnouncingConsumer,
    );
    sink.on_drain(|| println!("  drain: safe to write again"));
    for label in ["5", "4", "3", "2", "1"] {
        let accepted = sink.write(label.as_bytes().to_vec())?;
        if !accepted {
            println!("  write {} refused, sink is at its high-water mark", label);
        }
    }
    sink.end(None)?;
    queue.run_until_idle();

    Ok(())
}
