use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Running totals for one kind of operation.
#[derive(Default)]
struct OpTimer {
    count: AtomicUsize,
    total_us: AtomicU64,
}

impl OpTimer {
    fn record(&self, duration: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn avg_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0 // Convert to ms
    }
}

/// In-process counters, shared by all handlers.
#[derive(Default)]
pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing
    ask: OpTimer,
    extract: OpTimer,
    graph: OpTimer,
    index: OpTimer,

    // Counts
    chunks_indexed: AtomicUsize,
    chunks_failed: AtomicUsize,
    entities_extracted: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ask(&self, duration: Duration) {
        self.ask.record(duration);
    }

    pub fn record_extract(&self, duration: Duration, entities: usize) {
        self.extract.record(duration);
        self.entities_extracted.fetch_add(entities, Ordering::Relaxed);
    }

    pub fn record_graph(&self, duration: Duration, entities: usize) {
        self.graph.record(duration);
        self.entities_extracted.fetch_add(entities, Ordering::Relaxed);
    }

    pub fn record_index(&self, duration: Duration, indexed: usize, failed: usize) {
        self.index.record(duration);
        self.chunks_indexed.fetch_add(indexed, Ordering::Relaxed);
        self.chunks_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_ask_time_ms: self.ask.avg_ms(),
            avg_extract_time_ms: self.extract.avg_ms(),
            avg_graph_time_ms: self.graph.avg_ms(),
            avg_index_time_ms: self.index.avg_ms(),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_ask_time_ms: f64,
    pub avg_extract_time_ms: f64,
    pub avg_graph_time_ms: f64,
    pub avg_index_time_ms: f64,
    pub chunks_indexed: usize,
    pub chunks_failed: usize,
    pub entities_extracted: usize,
}
