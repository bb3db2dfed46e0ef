//! Plain atomic counters behind a typed struct. No metrics-exporter crate
//! appears anywhere in the retrieval pack, so this stays `std::sync::atomic`
//! rather than pulling one in for its own sake.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub ws_connections: AtomicU64,
    pub ws_disconnections: AtomicU64,
    pub audio_chunks_processed: AtomicU64,
    pub backpressure_drops: AtomicU64,
    pub asr_requests: AtomicU64,
    pub asr_timeouts: AtomicU64,
    pub llm_requests: AtomicU64,
    pub llm_retries: AtomicU64,
    pub llm_errors: AtomicU64,
    pub transcripts_emitted: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "ws_connections": self.ws_connections.load(Ordering::Relaxed),
            "ws_disconnections": self.ws_disconnections.load(Ordering::Relaxed),
            "audio_chunks_processed": self.audio_chunks_processed.load(Ordering::Relaxed),
            "backpressure_drops": self.backpressure_drops.load(Ordering::Relaxed),
            "asr_requests": self.asr_requests.load(Ordering::Relaxed),
            "asr_timeouts": self.asr_timeouts.load(Ordering::Relaxed),
            "llm_requests": self.llm_requests.load(Ordering::Relaxed),
            "llm_retries": self.llm_retries.load(Ordering::Relaxed),
            "llm_errors": self.llm_errors.load(Ordering::Relaxed),
            "transcripts_emitted": self.transcripts_emitted.load(Ordering::Relaxed),
        })
    }
}

pub trait CounterExt {
    fn inc(&self);
}

impl CounterExt for AtomicU64 {
    fn inc(&self) {
        self.fetch_add(1, Ordering::Relaxed);
    }
}

impl shared_llm::RetryObserver for Metrics {
    fn on_retry(&self) {
        self.llm_retries.inc();
    }

    fn on_error(&self) {
        self.llm_errors.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new();
        assert_eq!(metrics.ws_connections.load(Ordering::Relaxed), 0);
        metrics.ws_connections.inc();
        metrics.ws_connections.inc();
        assert_eq!(metrics.ws_connections.load(Ordering::Relaxed), 2);
    }
}
