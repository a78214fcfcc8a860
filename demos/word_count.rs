//! Word frequency counter over a streaming pipeline
//!
//! Reads lines from stdin, splits them into word chunks in a transform
//! stage, and counts frequencies in the sink. Prints the top-10 words once
//! the input ends.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use chunkflow::{
    Chunk, Completion, Consumer, InertProducer, Pipeline, Result as StreamResult, SinkEngine,
    SourceEngine, StreamConfig, TaskQueue, Transform, TransformContext, TransformStage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;

/// Splits a line chunk into one lowercase chunk per word
struct WordSplitter;

impl Transform for WordSplitter {
    fn transform(&mut self, chunk: Chunk, ctx: &TransformContext) -> StreamResult<()> {
        let text = String::from_utf8_lossy(&chunk);
        for word in text.split_whitespace() {
            let cleaned: String = word
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if cleaned.len() > 2 {
                ctx.emit(cleaned.into_bytes())?;
            }
        }
        ctx.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        "word_splitter"
    }
}

/// Counts word chunks and reports progress every 100 words
struct WordCounter {
    counts: Arc<Mutex<HashMap<String, usize>>>,
    seen: usize,
}

impl WordCounter {
    fn new(counts: Arc<Mutex<HashMap<String, usize>>>) -> Self {
        Self { counts, seen: 0 }
    }
}

impl Consumer for WordCounter {
    fn consume(&mut self, chunks: Vec<Chunk>, done: Completion) -> StreamResult<()> {
        for chunk in chunks {
            let word = String::from_utf8_lossy(&chunk).to_string();
            *self.counts.lock().entry(word).or_insert(0) += 1;
            self.seen += 1;
            if self.seen % 100 == 0 {
                println!("... {} words so far", self.seen);
            }
        }
        done.complete();
        Ok(())
    }

    fn name(&self) -> &str {
        "word_counter"
    }
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1));
    items.into_iter().take(n).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let queue = TaskQueue::new();
    let pipeline = Pipeline::new();

    let source = SourceEngine::new(&queue, StreamConfig::default(), InertProducer);
    let stage = TransformStage::new(&queue, StreamConfig::default(), WordSplitter);
    let counts = Arc::new(Mutex::new(HashMap::new()));
    let sink = SinkEngine::new(
        &queue,
        StreamConfig::default(),
        WordCounter::new(Arc::clone(&counts)),
    );

    pipeline.connect_through(&source, &stage, &sink)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        source.emit(line.into_bytes())?;
        queue.run_until_idle();
    }

    source.signal_end()?;
    queue.run_until_idle();

    println!("\n=== Top 10 Words ===");
    for (i, (word, count)) in top_n(&counts.lock(), 10).iter().enumerate() {
        println!("{:2}. {} ({})", i + 1, word, count);
    }

    Ok(())
}
