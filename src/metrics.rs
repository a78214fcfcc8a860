use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A sliding-window tracker for chunk-size percentiles, useful when tuning
/// a stream's high-water mark
#[derive(Debug, Clone)]
pub struct ChunkSizeTracker {
    sizes: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl ChunkSizeTracker {
    /// Create a tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            sizes: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record one chunk's size in bytes
    pub fn record(&self, bytes: u64) {
        let mut sizes = self.sizes.lock();
        if sizes.len() >= self.window_size {
            sizes.pop_front();
        }
        sizes.push_back(bytes);
    }

    /// Median chunk size in bytes
    pub fn p50_bytes(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile chunk size in bytes
    pub fn p95_bytes(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile chunk size in bytes
    pub fn p99_bytes(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let sizes = self.sizes.lock();
        if sizes.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<_> = sizes.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64
    }

    /// Number of recorded chunks in the window
    pub fn count(&self) -> usize {
        self.sizes.lock().len()
    }
}

/// Per-pipeline metrics collector, the optional sink a link reports into
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    /// Chunks forwarded through the link
    chunks_forwarded: Arc<AtomicU64>,
    /// Bytes forwarded through the link
    bytes_forwarded: Arc<AtomicU64>,
    /// Writes refused at the high-water mark (backpressure stalls)
    stalls: Arc<AtomicU64>,
    /// Drain notifications observed
    drains: Arc<AtomicU64>,
    /// Chunk-size distribution over a sliding window
    size_tracker: ChunkSizeTracker,
    /// Creation time for throughput calculation
    start_time: Instant,
}

impl StreamMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            chunks_forwarded: Arc::new(AtomicU64::new(0)),
            bytes_forwarded: Arc::new(AtomicU64::new(0)),
            stalls: Arc::new(AtomicU64::new(0)),
            drains: Arc::new(AtomicU64::new(0)),
            size_tracker: ChunkSizeTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Record a forwarded chunk
    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes as u64, Ordering::Relaxed);
        self.size_tracker.record(bytes as u64);
    }

    /// Record a backpressure stall (a write that returned false)
    pub fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a drain notification
    pub fn record_drain(&self) {
        self.drains.fetch_add(1, Ordering::Relaxed);
    }

    /// Total chunks forwarded
    pub fn total_chunks(&self) -> u64 {
        self.chunks_forwarded.load(Ordering::Relaxed)
    }

    /// Total bytes forwarded
    pub fn total_bytes(&self) -> u64 {
        self.bytes_forwarded.load(Ordering::Relaxed)
    }

    /// Total backpressure stalls
    pub fn total_stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Total drain notifications
    pub fn total_drains(&self) -> u64 {
        self.drains.load(Ordering::Relaxed)
    }

    /// Throughput in chunks per second since creation
    pub fn throughput_cps(&self) -> f64 {
        let elapsed = self.start_time.elapsed();
        let total = self.total_chunks();
        if elapsed.as_secs_f64() == 0.0 {
            0.0
        } else {
            total as f64 / elapsed.as_secs_f64()
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_chunks: self.total_chunks(),
            total_bytes: self.total_bytes(),
            total_stalls: self.total_stalls(),
            total_drains: self.total_drains(),
            throughput_cps: self.throughput_cps(),
            chunk_p50_bytes: self.size_tracker.p50_bytes(),
            chunk_p95_bytes: self.size_tracker.p95_bytes(),
            chunk_p99_bytes: self.size_tracker.p99_bytes(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_chunks: u64,
    pub total_bytes: u64,
    pub total_stalls: u64,
    pub total_drains: u64,
    pub throughput_cps: f64,
    pub chunk_p50_bytes: f64,
    pub chunk_p95_bytes: f64,
    pub chunk_p99_bytes: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Chunks: {}, Bytes: {}, Stalls: {}, Drains: {}, Throughput: {:.2} chunk/s, \
             Size P50: {:.0}B, P95: {:.0}B, P99: {:.0}B, Elapsed: {:.2}s",
            self.total_chunks,
            self.total_bytes,
            self.total_stalls,
            self.total_drains,
            self.throughput_cps,
            self.chunk_p50_bytes,
            self.chunk_p95_bytes,
            self.chunk_p99_bytes,
            self.elapsed.as_secs_f64()
        )
    }
}
