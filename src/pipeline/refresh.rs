//! Statistics refresh scheduling.
//!
//! The arrival handler calls [`StatisticsGate::on_arrival`] for every frame;
//! once the interval has elapsed since the last refresh it raises a pending
//! flag that the capture worker consumes with [`StatisticsGate::take_pending`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::device::types::CaptureStatistics;

/// Device counters as last sampled. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub interface_dropped: u64,
    #[serde(serialize_with = "serialize_unix_ms")]
    pub sampled_at: SystemTime,
}

impl StatisticsSnapshot {
    pub fn new(statistics: CaptureStatistics, sampled_at: SystemTime) -> Self {
        Self {
            received: statistics.received,
            dropped: statistics.dropped,
            interface_dropped: statistics.interface_dropped,
            sampled_at,
        }
    }
}

fn serialize_unix_ms<S: Serializer>(at: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let ms = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    serializer.serialize_u64(ms)
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Decides when the device statistics should be refreshed.
pub struct StatisticsGate {
    clock: Arc<dyn Clock>,
    interval: Duration,
    last_refresh: Mutex<Instant>,
    pending: AtomicBool,
}

impl StatisticsGate {
    /// Create a gate whose interval starts now.
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let now = clock.now();
        Self {
            clock,
            interval,
            last_refresh: Mutex::new(now),
            pending: AtomicBool::new(false),
        }
    }

    /// Record a frame arrival; flags a refresh once more than the interval has
    /// passed since the previous one.
    pub fn on_arrival(&self) {
        let now = self.clock.now();
        let mut last = self.last_refresh.lock();
        if now.saturating_duration_since(*last) > self.interval {
            *last = now;
            self.pending.store(true, Ordering::Release);
        }
    }

    /// Consume the pending flag.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
