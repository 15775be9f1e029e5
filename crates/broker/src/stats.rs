use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic message counters, readable via `RPCGetMessageStats` (§3, §5).
///
/// All counters are plain atomics so a snapshot never takes a lock on the router's hot path.
#[derive(Debug, Default)]
pub struct Stats {
    total_sent: AtomicU64,
    total_received: AtomicU64,
    request_count: AtomicU64,
    response_count: AtomicU64,
    event_count: AtomicU64,
    error_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub total_sent: u64,
    pub total_received: u64,
    pub request_count: u64,
    pub response_count: u64,
    pub event_count: u64,
    pub error_count: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.total_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, kind: MessageKind) {
        self.total_received.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            MessageKind::Request => &self.request_count,
            MessageKind::Response => &self.response_count,
            MessageKind::Event => &self.event_count,
            MessageKind::Error => &self.error_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_received: self.total_received.load(Ordering::Relaxed),
            request_count: self.request_count.load(Ordering::Relaxed),
            response_count: self.response_count.load(Ordering::Relaxed),
            event_count: self.event_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    pub fn total_message_count(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed) + self.total_received.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MessageKind {
    Request,
    Response,
    Event,
    Error,
}
