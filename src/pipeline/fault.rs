use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::device::types::DeviceId;
use crate::pipeline::error::PipelineError;

/// Called from the thread that hit a session fault.
/// Arguments: (device_id, error).
pub type ErrorCallback = Arc<dyn Fn(&DeviceId, &PipelineError) + Send + Sync>;

/// Holds the first fatal error raised off the control thread during a session.
///
/// Later faults are logged but do not replace the first one.
pub struct FaultSlot {
    device_id: DeviceId,
    fault: Mutex<Option<PipelineError>>,
    on_error: Option<ErrorCallback>,
}

impl FaultSlot {
    pub fn new(device_id: DeviceId, on_error: Option<ErrorCallback>) -> Self {
        Self {
            device_id,
            fault: Mutex::new(None),
            on_error,
        }
    }

    /// Record a fault. Returns `true` if this was the first one.
    pub fn report(&self, err: PipelineError) -> bool {
        error!("capture session fault on {}: {err}", self.device_id);
        {
            let mut slot = self.fault.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(err.clone());
        }
        if let Some(cb) = &self.on_error {
            cb(&self.device_id, &err);
        }
        true
    }

    pub fn is_set(&self) -> bool {
        self.fault.lock().is_some()
    }

    pub fn take(&self) -> Option<PipelineError> {
        self.fault.lock().take()
    }
}
