use serde::Serialize;
use std::time::Instant;

/// Collects diagnostic counters for a capture session.
pub struct SessionDiagnostics {
    frame_count: u64,
    total_bytes: u64,
    drain_count: u64,
    largest_drain: usize,
    publish_failures: u64,
    statistics_refreshes: u64,
    start_time: Instant,
    last_drain_time: Option<Instant>,
}

/// Snapshot of session diagnostics for serialisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub frame_count: u64,
    pub total_bytes: u64,
    pub drain_count: u64,
    pub largest_drain: usize,
    pub publish_failures: u64,
    pub statistics_refreshes: u64,
    pub bandwidth_bps: u64,
    pub ms_since_last_drain: Option<u64>,
}

impl SessionDiagnostics {
    /// Create new diagnostics with zeroed counters.
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            total_bytes: 0,
            drain_count: 0,
            largest_drain: 0,
            publish_failures: 0,
            statistics_refreshes: 0,
            start_time: Instant::now(),
            last_drain_time: None,
        }
    }

    /// Record a non-empty drain of `frames` frames totalling `bytes` bytes.
    pub fn record_drain(&mut self, frames: usize, bytes: usize) {
        self.drain_count += 1;
        self.frame_count += frames as u64;
        self.total_bytes += bytes as u64;
        self.largest_drain = self.largest_drain.max(frames);
        self.last_drain_time = Some(Instant::now());
    }

    /// Record a publish the sink rejected.
    pub fn record_publish_failure(&mut self) {
        self.publish_failures += 1;
    }

    /// Record a completed statistics refresh.
    pub fn record_statistics_refresh(&mut self) {
        self.statistics_refreshes += 1;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }

    /// Frames wrapped per second since the session started.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.frame_count as f64 / elapsed
    }

    /// Bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Reset all counters and restart the rate window.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            fps: self.fps(),
            frame_count: self.frame_count,
            total_bytes: self.total_bytes,
            drain_count: self.drain_count,
            largest_drain: self.largest_drain,
            publish_failures: self.publish_failures,
            statistics_refreshes: self.statistics_refreshes,
            bandwidth_bps: self.bandwidth_bps(),
            ms_since_last_drain: self
                .last_drain_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}
