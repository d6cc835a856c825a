use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::warn;

use crate::device::backend::{CaptureBackend, CaptureDevice};
use crate::device::error::{DeviceError, Result};
use crate::device::types::{
    CaptureStatistics, DeviceHandlers, DeviceId, DeviceInfo, LinkType, RawFrame, StopStatus,
};

const DUMMY_DEVICE_ID: &str = "dummy0";
const DUMMY_DEVICE_NAME: &str = "Dummy Capture Device";

/// Default delay between synthetic frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Build a synthetic Ethernet/IPv4/UDP frame carrying `seq` in its payload.
///
/// The UDP source port cycles with `seq` so consecutive frames are
/// distinguishable in summaries.
pub fn synthetic_frame(seq: u64) -> Vec<u8> {
    let payload = format!("packet-viewer #{seq}").into_bytes();
    let udp_len = 8 + payload.len();
    let ip_len = 20 + udp_len;
    let src_port = 40000 + (seq % 1000) as u16;

    let mut frame = Vec::with_capacity(14 + ip_len);
    // Ethernet: dst, src, EtherType IPv4
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    frame.extend_from_slice(&[0x08, 0x00]);
    // IPv4: version/IHL, TOS, total length, id, flags/fragment, TTL, UDP, checksum
    frame.extend_from_slice(&[0x45, 0x00]);
    frame.extend_from_slice(&(ip_len as u16).to_be_bytes());
    frame.extend_from_slice(&(seq as u16).to_be_bytes());
    frame.extend_from_slice(&[0x40, 0x00, 64, 17, 0x00, 0x00]);
    frame.extend_from_slice(&[10, 0, 0, 1]);
    frame.extend_from_slice(&[10, 0, 0, 2]);
    // UDP: ports, length, checksum (unset)
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&53u16.to_be_bytes());
    frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&payload);
    frame
}

/// A simulated capture backend for running without libpcap or privileges.
///
/// Enable via `DUMMY_CAPTURE=1` environment variable.
pub struct DummyBackend {
    frame_interval: Duration,
}

impl DummyBackend {
    pub fn new(frame_interval: Duration) -> Self {
        Self { frame_interval }
    }

    /// Whether the dummy device is enabled via environment variable.
    pub fn is_enabled() -> bool {
        std::env::var("DUMMY_CAPTURE").is_ok_and(|v| v == "1" || v == "true")
    }

    /// The stable device ID for the dummy device.
    pub fn device_id() -> DeviceId {
        DeviceId::new(DUMMY_DEVICE_ID)
    }

    fn device_info() -> DeviceInfo {
        DeviceInfo {
            id: Self::device_id(),
            name: DUMMY_DEVICE_NAME.to_string(),
            description: Some("Synthetic UDP traffic generator".to_string()),
            is_loopback: false,
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl CaptureBackend for DummyBackend {
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![Self::device_info()])
    }

    fn device(&self, id: &DeviceId) -> Result<Arc<dyn CaptureDevice>> {
        if id != &Self::device_id() {
            return Err(DeviceError::NotFound(id.to_string()));
        }
        Ok(Arc::new(DummyDevice::new(self.frame_interval)))
    }
}

/// Simulated device: a generator thread emits synthetic frames while capturing.
pub struct DummyDevice {
    info: DeviceInfo,
    frame_interval: Duration,
    open: AtomicBool,
    running: Arc<AtomicBool>,
    received: Arc<AtomicU64>,
    handlers: Arc<Mutex<Option<DeviceHandlers>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DummyDevice {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            info: DummyBackend::device_info(),
            frame_interval,
            open: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            received: Arc::new(AtomicU64::new(0)),
            handlers: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }

    /// Number of frames generated since `open`.
    pub fn generated(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Generator loop that runs on the dummy device thread.
fn generate_frames(
    handlers: &Mutex<Option<DeviceHandlers>>,
    running: &AtomicBool,
    received: &AtomicU64,
    interval: Duration,
) {
    let mut seq: u64 = 0;
    while running.load(Ordering::Acquire) {
        let on_arrival = handlers.lock().as_ref().map(|h| h.on_arrival.clone());
        if let Some(on_arrival) = on_arrival {
            received.fetch_add(1, Ordering::Relaxed);
            on_arrival(RawFrame::new(
                synthetic_frame(seq),
                SystemTime::now(),
                LinkType::Ethernet,
            ));
            seq += 1;
        }
        std::thread::park_timeout(interval);
    }

    let on_stopped = handlers.lock().as_ref().map(|h| h.on_stopped.clone());
    if let Some(on_stopped) = on_stopped {
        on_stopped(StopStatus::CompletedWithoutError);
    }
}

impl CaptureDevice for DummyDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&self) -> Result<()> {
        self.received.store(0, Ordering::Relaxed);
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DeviceError::Start("device not open".into()));
        }
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(DeviceError::Start("capture already running".into()));
        }

        self.running.store(true, Ordering::Release);
        let handlers = Arc::clone(&self.handlers);
        let running = Arc::clone(&self.running);
        let received = Arc::clone(&self.received);
        let interval = self.frame_interval;

        let handle = std::thread::Builder::new()
            .name("dummy-capture".to_string())
            .spawn(move || generate_frames(&handlers, &running, &received, interval))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                DeviceError::Start(format!("failed to spawn generator thread: {e}"))
            })?;
        *thread = Some(handle);
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            handle.thread().unpark();
            handle
                .join()
                .map_err(|_| DeviceError::Stop("generator thread panicked".into()))?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn statistics(&self) -> Result<CaptureStatistics> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DeviceError::Statistics("device not open".into()));
        }
        Ok(CaptureStatistics {
            received: self.received.load(Ordering::Relaxed),
            dropped: 0,
            interface_dropped: 0,
        })
    }

    fn set_handlers(&self, handlers: DeviceHandlers) {
        *self.handlers.lock() = Some(handlers);
    }

    fn clear_handlers(&self) {
        *self.handlers.lock() = None;
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop_capture() {
            warn!("failed to stop {} on drop: {e}", self.info.id);
        }
    }
}
