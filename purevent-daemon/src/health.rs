use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize)]
pub struct HealthCounters {
    pub uptime_seconds: u64,
    pub reconnects: u32,
    pub frames_received: u64,
    pub decode_failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_frame_at: Option<OffsetDateTime>,
}

/// Counters shared between the receive loop and the HTTP facade.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    reconnects: Arc<AtomicU32>,
    frames_received: Arc<AtomicU64>,
    decode_failures: Arc<AtomicU64>,
    last_frame_at: Arc<Mutex<Option<OffsetDateTime>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            reconnects: Arc::new(AtomicU32::new(0)),
            frames_received: Arc::new(AtomicU64::new(0)),
            decode_failures: Arc::new(AtomicU64::new(0)),
            last_frame_at: Arc::new(Mutex::new(None)),
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, at: OffsetDateTime) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        *self.last_frame_at.lock() = Some(at);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> HealthCounters {
        HealthCounters {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            last_frame_at: *self.last_frame_at.lock(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
