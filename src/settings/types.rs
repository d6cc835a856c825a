use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::capture::PipelineConfig;

/// Capture pipeline timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Worker sleep when the queue is empty.
    pub idle_interval_ms: u64,
    /// Minimum time between device statistics refreshes.
    pub statistics_interval_ms: u64,
    /// Upper bound on waiting for the worker during `stop`.
    pub stop_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            idle_interval_ms: 250,
            statistics_interval_ms: 2000,
            stop_timeout_ms: 5000,
        }
    }
}

/// libpcap capture options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureSettings {
    pub snaplen: i32,
    pub promiscuous: bool,
    pub read_timeout_ms: i32,
    pub immediate_mode: bool,
    /// Kernel buffer size in bytes (0 = library default).
    pub buffer_size: i32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            snaplen: 65535,
            promiscuous: true,
            read_timeout_ms: 100,
            immediate_mode: true,
            buffer_size: 0,
        }
    }
}

/// Simulated device options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DummySettings {
    pub frame_interval_ms: u64,
}

impl Default for DummySettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: 100,
        }
    }
}

/// Top-level settings file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineSettings,
    pub capture: CaptureSettings,
    pub dummy: DummySettings,
}

/// Values given on the command line, each replacing the file's value when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub idle_interval_ms: Option<u64>,
    pub statistics_interval_ms: Option<u64>,
    pub snaplen: Option<i32>,
    pub promiscuous: Option<bool>,
}

impl Settings {
    /// Apply command-line overrides on top of the loaded file.
    pub fn apply(&mut self, overrides: &SettingsOverrides) {
        if let Some(ms) = overrides.idle_interval_ms {
            self.pipeline.idle_interval_ms = ms;
        }
        if let Some(ms) = overrides.statistics_interval_ms {
            self.pipeline.statistics_interval_ms = ms;
        }
        if let Some(snaplen) = overrides.snaplen {
            self.capture.snaplen = snaplen;
        }
        if let Some(promiscuous) = overrides.promiscuous {
            self.capture.promiscuous = promiscuous;
        }
    }

    /// Runtime configuration for `CapturePipeline`.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            idle_interval: Duration::from_millis(self.pipeline.idle_interval_ms),
            statistics_interval: Duration::from_millis(self.pipeline.statistics_interval_ms),
            stop_timeout: Duration::from_millis(self.pipeline.stop_timeout_ms),
        }
    }

    pub fn dummy_frame_interval(&self) -> Duration {
        Duration::from_millis(self.dummy.frame_interval_ms)
    }
}
