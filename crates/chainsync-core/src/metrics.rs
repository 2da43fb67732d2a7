//! Metrics sink.
//!
//! Components receive an `Arc<dyn SyncMetrics>` instead of touching global
//! counters. Exposition (Prometheus, OTLP, ...) belongs to the embedding
//! application; every method defaults to a no-op.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub trait SyncMetrics: Send + Sync {
    /// One RPC request finished (successfully or not).
    fn rpc_request(&self, _chain_id: u64, _method: &str, _queue_wait: Duration, _latency: Duration, _ok: bool) {}

    fn historical_total_blocks(&self, _chain_id: u64, _source_id: &str, _blocks: u64) {}

    fn historical_cached_blocks(&self, _chain_id: u64, _source_id: &str, _blocks: u64) {}

    fn historical_completed_blocks(&self, _chain_id: u64, _source_id: &str, _blocks: u64) {}

    fn historical_checkpoint(&self, _chain_id: u64, _block_number: u64) {}

    fn realtime_block(&self, _chain_id: u64, _block_number: u64) {}

    fn realtime_reorg(&self, _chain_id: u64, _depth: u64) {}

    fn realtime_finalize(&self, _chain_id: u64, _block_number: u64) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {}

/// Snapshot of what a [`RecordingMetrics`] has seen.
#[derive(Debug, Default, Clone)]
pub struct RecordedMetrics {
    /// `(method, ok)` per request, in completion order.
    pub rpc_requests: Vec<(String, bool)>,
    pub total_blocks: HashMap<String, u64>,
    pub cached_blocks: HashMap<String, u64>,
    /// Completed blocks accumulated per source.
    pub completed_blocks: HashMap<String, u64>,
    pub historical_checkpoints: Vec<u64>,
    pub realtime_blocks: Vec<u64>,
    pub reorg_depths: Vec<u64>,
    pub finalized_blocks: Vec<u64>,
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    inner: Mutex<RecordedMetrics>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RecordedMetrics {
        self.inner.lock().unwrap().clone()
    }
}

impl SyncMetrics for RecordingMetrics {
    fn rpc_request(&self, _chain_id: u64, method: &str, _queue_wait: Duration, _latency: Duration, ok: bool) {
        self.inner.lock().unwrap().rpc_requests.push((method.to_string(), ok));
    }

    fn historical_total_blocks(&self, _chain_id: u64, source_id: &str, blocks: u64) {
        self.inner.lock().unwrap().total_blocks.insert(source_id.to_string(), blocks);
    }

    fn historical_cached_blocks(&self, _chain_id: u64, source_id: &str, blocks: u64) {
        self.inner.lock().unwrap().cached_blocks.insert(source_id.to_string(), blocks);
    }

    fn historical_completed_blocks(&self, _chain_id: u64, source_id: &str, blocks: u64) {
        *self
            .inner
            .lock()
            .unwrap()
            .completed_blocks
            .entry(source_id.to_string())
            .or_default() += blocks;
    }

    fn historical_checkpoint(&self, _chain_id: u64, block_number: u64) {
        self.inner.lock().unwrap().historical_checkpoints.push(block_number);
    }

    fn realtime_block(&self, _chain_id: u64, block_number: u64) {
        self.inner.lock().unwrap().realtime_blocks.push(block_number);
    }

    fn realtime_reorg(&self, _chain_id: u64, depth: u64) {
        self.inner.lock().unwrap().reorg_depths.push(depth);
    }

    fn realtime_finalize(&self, _chain_id: u64, block_number: u64) {
        self.inner.lock().unwrap().finalized_blocks.push(block_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_accumulates_completed_blocks() {
        let m = RecordingMetrics::new();
        m.historical_completed_blocks(1, "a", 10);
        m.historical_completed_blocks(1, "a", 5);
        m.rpc_request(1, "eth_getLogs", Duration::ZERO, Duration::from_millis(3), true);
        let s = m.snapshot();
        assert_eq!(s.completed_blocks["a"], 15);
        assert_eq!(s.rpc_requests, vec![("eth_getLogs".to_string(), true)]);
    }

    #[test]
    fn noop_is_object_safe() {
        let m: std::sync::Arc<dyn SyncMetrics> = std::sync::Arc::new(NoopMetrics);
        m.realtime_block(1, 1);
    }
}
