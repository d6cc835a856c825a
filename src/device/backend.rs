use std::sync::Arc;

use crate::device::error::Result;
use crate::device::types::{CaptureStatistics, DeviceHandlers, DeviceId, DeviceInfo};

/// A device that delivers captured frames through registered handlers.
///
/// Implemented by the libpcap adapter, the dummy device and the test mock.
/// All methods take `&self` so the pipeline (lifecycle) and the capture worker
/// (statistics) can share one handle.
pub trait CaptureDevice: Send + Sync {
    /// Static description of the device.
    fn info(&self) -> &DeviceInfo;

    /// Acquire the underlying handle. No frames are delivered yet.
    fn open(&self) -> Result<()>;

    /// Begin delivering frames to the registered arrival handler.
    ///
    /// Frames are delivered on a device-owned thread; the stopped handler
    /// fires on that thread when delivery ends.
    fn start_capture(&self) -> Result<()>;

    /// Stop delivering frames. No arrival handler call starts after this returns.
    fn stop_capture(&self) -> Result<()>;

    /// Release the handle acquired by `open`.
    fn close(&self) -> Result<()>;

    /// Query the device's capture counters.
    fn statistics(&self) -> Result<CaptureStatistics>;

    /// Register the arrival/stopped handler pair, replacing any previous pair.
    fn set_handlers(&self, handlers: DeviceHandlers);

    /// Drop the registered handlers.
    fn clear_handlers(&self);
}

/// Device discovery.
pub trait CaptureBackend: Send + Sync {
    /// Enumerate all capture-capable devices.
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Resolve a device by ID.
    fn device(&self, id: &DeviceId) -> Result<Arc<dyn CaptureDevice>>;
}
