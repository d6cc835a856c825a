//! Scriptable capture device for tests.
//!
//! Records every call, supports one-shot error injection per operation, and
//! lets tests emit frames and stop events as if they came from the device's
//! notification thread.

use std::sync::Mutex;

use crate::device::backend::CaptureDevice;
use crate::device::error::{DeviceError, Result};
use crate::device::types::{
    CaptureStatistics, DeviceHandlers, DeviceId, DeviceInfo, RawFrame, StopStatus,
};

/// Configurable error injection for a specific operation.
#[derive(Debug, Clone)]
struct ErrorInjection {
    operation: &'static str,
    /// Number of successful calls to let through before failing.
    skip: u32,
    error: DeviceError,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<&'static str>,
    open: bool,
    capturing: bool,
    statistics: CaptureStatistics,
    error_injections: Vec<ErrorInjection>,
    deliveries_after_close: u32,
}

impl MockState {
    /// Record the call and check for injected errors.
    fn enter(&mut self, operation: &'static str) -> Result<()> {
        self.calls.push(operation);
        if let Some(pos) = self
            .error_injections
            .iter()
            .position(|e| e.operation == operation)
        {
            if self.error_injections[pos].skip == 0 {
                let injection = self.error_injections.remove(pos);
                return Err(injection.error);
            }
            self.error_injections[pos].skip -= 1;
        }
        Ok(())
    }
}

/// Mock capture device.
///
/// All state is behind a `Mutex` so the mock satisfies `Send + Sync`.
pub struct MockDevice {
    info: DeviceInfo,
    state: Mutex<MockState>,
    handlers: Mutex<Option<DeviceHandlers>>,
}

impl MockDevice {
    pub fn new(name: &str) -> Self {
        Self {
            info: DeviceInfo {
                id: DeviceId::new(name),
                name: name.to_string(),
                description: Some("mock capture device".to_string()),
                is_loopback: false,
            },
            state: Mutex::new(MockState::default()),
            handlers: Mutex::new(None),
        }
    }

    /// Fail the next call to `operation`.
    ///
    /// Operation names: `"open"`, `"start_capture"`, `"stop_capture"`,
    /// `"close"`, `"statistics"`.
    pub fn with_error(self, operation: &'static str, error: DeviceError) -> Self {
        self.with_error_after(operation, 0, error)
    }

    /// Let `skip` calls to `operation` succeed, then fail the next one.
    pub fn with_error_after(self, operation: &'static str, skip: u32, error: DeviceError) -> Self {
        self.state
            .lock()
            .unwrap()
            .error_injections
            .push(ErrorInjection {
                operation,
                skip,
                error,
            });
        self
    }

    /// Override the counters returned by `statistics()`.
    pub fn set_statistics(&self, statistics: CaptureStatistics) {
        self.state.lock().unwrap().statistics = statistics;
    }

    /// Deliver a frame through the arrival handler, as the device thread would.
    ///
    /// Returns `false` when the frame was not delivered (capture not running
    /// or no handler registered). The state lock is held for the duration of
    /// the handler call so `stop_capture` waits for in-flight deliveries.
    pub fn emit(&self, frame: RawFrame) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.capturing {
            return false;
        }
        let Some(on_arrival) = self
            .handlers
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.on_arrival.clone())
        else {
            return false;
        };
        if !state.open {
            state.deliveries_after_close += 1;
        }
        state.statistics.received += 1;
        on_arrival(frame);
        true
    }

    /// Fire the stopped handler with `status`.
    pub fn emit_stopped(&self, status: StopStatus) -> bool {
        let on_stopped = self
            .handlers
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.on_stopped.clone());
        match on_stopped {
            Some(cb) => {
                cb(status);
                true
            }
            None => false,
        }
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls to `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().capturing
    }

    pub fn has_handlers(&self) -> bool {
        self.handlers.lock().unwrap().is_some()
    }

    /// Frames delivered while the device was closed.
    pub fn deliveries_after_close(&self) -> u32 {
        self.state.lock().unwrap().deliveries_after_close
    }
}

impl CaptureDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("open")?;
        state.open = true;
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("start_capture")?;
        if !state.open {
            return Err(DeviceError::Start("device not open".into()));
        }
        state.capturing = true;
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("stop_capture")?;
        state.capturing = false;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enter("close")?;
        state.open = false;
        Ok(())
    }

    fn statistics(&self) -> Result<CaptureStatistics> {
        let mut state = self.state.lock().unwrap();
        state.enter("statistics")?;
        if !state.open {
            return Err(DeviceError::Statistics("device not open".into()));
        }
        Ok(state.statistics)
    }

    fn set_handlers(&self, handlers: DeviceHandlers) {
        self.state.lock().unwrap().calls.push("set_handlers");
        *self.handlers.lock().unwrap() = Some(handlers);
    }

    fn clear_handlers(&self) {
        self.state.lock().unwrap().calls.push("clear_handlers");
        *self.handlers.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::LinkType;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;

    fn frame() -> RawFrame {
        RawFrame::new(vec![0u8; 60], SystemTime::now(), LinkType::Ethernet)
    }

    fn counting_handlers(count: Arc<AtomicU32>) -> DeviceHandlers {
        DeviceHandlers {
            on_arrival: Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
            on_stopped: Arc::new(|_| {}),
        }
    }

    #[test]
    fn emit_is_ignored_until_capture_starts() {
        let mock = MockDevice::new("mock0");
        let count = Arc::new(AtomicU32::new(0));
        mock.set_handlers(counting_handlers(Arc::clone(&count)));
        assert!(!mock.emit(frame()));

        mock.open().unwrap();
        mock.start_capture().unwrap();
        assert!(mock.emit(frame()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(mock.statistics().unwrap().received, 1);
    }

    #[test]
    fn injected_error_fires_once() {
        let mock = MockDevice::new("mock0").with_error("open", DeviceError::Open("busy".into()));
        assert!(mock.open().is_err());
        assert!(mock.open().is_ok());
        assert_eq!(mock.call_count("open"), 2);
    }

    #[test]
    fn injected_error_can_skip_calls() {
        let mock = MockDevice::new("mock0").with_error_after(
            "statistics",
            1,
            DeviceError::Statistics("gone".into()),
        );
        mock.open().unwrap();
        assert!(mock.statistics().is_ok());
        assert_eq!(
            mock.statistics(),
            Err(DeviceError::Statistics("gone".into()))
        );
        assert!(mock.statistics().is_ok());
    }

    #[test]
    fn calls_are_recorded_in_order() {
        let mock = MockDevice::new("mock0");
        mock.open().unwrap();
        mock.start_capture().unwrap();
        mock.stop_capture().unwrap();
        mock.close().unwrap();
        assert_eq!(
            mock.calls(),
            vec!["open", "start_capture", "stop_capture", "close"]
        );
    }

    #[test]
    fn emit_stopped_requires_handlers() {
        let mock = MockDevice::new("mock0");
        assert!(!mock.emit_stopped(StopStatus::CompletedWithoutError));
        mock.set_handlers(counting_handlers(Arc::new(AtomicU32::new(0))));
        assert!(mock.emit_stopped(StopStatus::CompletedWithoutError));
        mock.clear_handlers();
        assert!(!mock.has_handlers());
    }
}
