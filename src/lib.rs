pub mod decode;
pub mod device;
pub mod diagnostics;
pub mod pipeline;
pub mod settings;
pub mod view;

use device::backend::CaptureBackend;
use settings::types::Settings;

pub use pipeline::capture::{CapturePipeline, PipelineConfig, PipelineState};
pub use pipeline::error::{ErrorKind, PipelineError, PresentationError};
pub use pipeline::sink::PresentationSink;

/// Create the capture backend for this build.
///
/// When `dummy` is set or `DUMMY_CAPTURE=1`, a simulated device is used
/// instead. Without the `pcap` feature there is no real backend.
pub fn create_backend(settings: &Settings, dummy: bool) -> Box<dyn CaptureBackend> {
    if dummy || device::dummy::DummyBackend::is_enabled() {
        return Box::new(device::dummy::DummyBackend::new(
            settings.dummy_frame_interval(),
        ));
    }

    #[cfg(feature = "pcap")]
    {
        Box::new(device::pcap::PcapBackend::new(settings.capture.clone()))
    }

    #[cfg(not(feature = "pcap"))]
    {
        Box::new(NullBackend)
    }
}

/// Backend used when no capture library is compiled in.
#[cfg(not(feature = "pcap"))]
struct NullBackend;

#[cfg(not(feature = "pcap"))]
impl CaptureBackend for NullBackend {
    fn enumerate_devices(&self) -> device::error::Result<Vec<device::types::DeviceInfo>> {
        Ok(vec![])
    }

    fn device(
        &self,
        id: &device::types::DeviceId,
    ) -> device::error::Result<std::sync::Arc<dyn device::backend::CaptureDevice>> {
        Err(device::error::DeviceError::NotFound(id.to_string()))
    }
}
