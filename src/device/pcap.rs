//! libpcap capture adapter.
//!
//! `start_capture` spawns a reader thread that pulls packets with
//! `next_packet` and hands them to the arrival handler, mirroring the
//! push-style delivery of capture libraries that own their dispatch thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use pcap::{Active, Capture, Device};
use tracing::{debug, error, info, warn};

use crate::device::backend::{CaptureBackend, CaptureDevice};
use crate::device::error::{DeviceError, Result};
use crate::device::types::{
    CaptureStatistics, DeviceHandlers, DeviceId, DeviceInfo, LinkType, RawFrame, StopStatus,
};
use crate::settings::types::CaptureSettings;

/// Backend enumerating libpcap interfaces.
pub struct PcapBackend {
    settings: CaptureSettings,
}

impl PcapBackend {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }
}

fn device_info(device: &Device) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId::new(device.name.clone()),
        name: device.name.clone(),
        description: device.desc.clone(),
        is_loopback: device.flags.is_loopback(),
    }
}

impl CaptureBackend for PcapBackend {
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = Device::list().map_err(|e| DeviceError::Enumeration(e.to_string()))?;
        Ok(devices.iter().map(device_info).collect())
    }

    fn device(&self, id: &DeviceId) -> Result<Arc<dyn CaptureDevice>> {
        let devices = Device::list().map_err(|e| DeviceError::Enumeration(e.to_string()))?;
        let device = devices
            .into_iter()
            .find(|d| d.name == id.as_str())
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
        Ok(Arc::new(PcapDevice::new(device, self.settings.clone())))
    }
}

type SharedCapture = Arc<Mutex<Option<Capture<Active>>>>;

/// A libpcap interface.
pub struct PcapDevice {
    info: DeviceInfo,
    device: Device,
    settings: CaptureSettings,
    capture: SharedCapture,
    running: Arc<AtomicBool>,
    handlers: Arc<Mutex<Option<DeviceHandlers>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PcapDevice {
    pub fn new(device: Device, settings: CaptureSettings) -> Self {
        Self {
            info: device_info(&device),
            device,
            settings,
            capture: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            handlers: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }

    /// Activate a pcap capture with the configured options.
    fn activate(&self) -> Result<Capture<Active>> {
        let mut capture = Capture::from_device(self.device.clone())
            .map_err(|e| DeviceError::Open(e.to_string()))?
            .promisc(self.settings.promiscuous)
            .snaplen(self.settings.snaplen)
            .timeout(self.settings.read_timeout_ms)
            .immediate_mode(self.settings.immediate_mode);

        if self.settings.buffer_size > 0 {
            capture = capture.buffer_size(self.settings.buffer_size);
        }

        capture.open().map_err(|e| DeviceError::Open(e.to_string()))
    }
}

/// Convert a pcap header timestamp. Values before the epoch or out of range
/// fall back to the current time.
fn frame_timestamp(secs: i64, micros: i64) -> SystemTime {
    let secs = u64::try_from(secs).ok();
    let micros = u32::try_from(micros).ok().filter(|us| *us < 1_000_000);
    secs.zip(micros)
        .and_then(|(secs, micros)| UNIX_EPOCH.checked_add(Duration::new(secs, micros * 1000)))
        .unwrap_or_else(SystemTime::now)
}

/// Reader loop that runs on the pcap capture thread.
///
/// The capture lock is released before each handler call so `statistics()`
/// only ever waits for one read timeout.
fn read_packets(
    capture: &Mutex<Option<Capture<Active>>>,
    handlers: &Mutex<Option<DeviceHandlers>>,
    running: &AtomicBool,
) -> StopStatus {
    while running.load(Ordering::Acquire) {
        let frame = {
            let mut guard = capture.lock();
            let Some(cap) = guard.as_mut() else {
                return StopStatus::Error("capture handle closed".to_string());
            };
            let link_type = LinkType::from_dlt(cap.get_datalink().0);
            match cap.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts;
                    let timestamp = frame_timestamp(ts.tv_sec as i64, ts.tv_usec as i64);
                    RawFrame::new(packet.data.to_vec(), timestamp, link_type)
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return StopStatus::Error(e.to_string()),
            }
        };

        let on_arrival = handlers.lock().as_ref().map(|h| h.on_arrival.clone());
        if let Some(on_arrival) = on_arrival {
            on_arrival(frame);
        }
    }
    StopStatus::CompletedWithoutError
}

impl CaptureDevice for PcapDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&self) -> Result<()> {
        let capture = self.activate()?;
        info!(device = %self.info.id, "pcap device opened");
        *self.capture.lock() = Some(capture);
        Ok(())
    }

    fn start_capture(&self) -> Result<()> {
        if self.capture.lock().is_none() {
            return Err(DeviceError::Start("device not open".into()));
        }
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(DeviceError::Start("capture already running".into()));
        }

        self.running.store(true, Ordering::Release);
        let capture = Arc::clone(&self.capture);
        let handlers = Arc::clone(&self.handlers);
        let running = Arc::clone(&self.running);
        let name = self.info.id.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("pcap-{name}"))
            .spawn(move || {
                debug!("pcap reader starting for {name}");
                let status = read_packets(&capture, &handlers, &running);
                if let StopStatus::Error(ref e) = status {
                    error!("pcap reader failed for {name}: {e}");
                }
                running.store(false, Ordering::Release);
                let on_stopped = handlers.lock().as_ref().map(|h| h.on_stopped.clone());
                if let Some(on_stopped) = on_stopped {
                    on_stopped(status);
                }
                debug!("pcap reader exiting for {name}");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                DeviceError::Start(format!("failed to spawn pcap reader: {e}"))
            })?;
        *thread = Some(handle);
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            handle
                .join()
                .map_err(|_| DeviceError::Stop("pcap reader panicked".into()))?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.capture.lock().take().is_some() {
            info!(device = %self.info.id, "pcap device closed");
        }
        Ok(())
    }

    fn statistics(&self) -> Result<CaptureStatistics> {
        let mut guard = self.capture.lock();
        let capture = guard
            .as_mut()
            .ok_or_else(|| DeviceError::Statistics("device not open".into()))?;
        let stat = capture
            .stats()
            .map_err(|e| DeviceError::Statistics(e.to_string()))?;
        Ok(CaptureStatistics {
            received: u64::from(stat.received),
            dropped: u64::from(stat.dropped),
            interface_dropped: u64::from(stat.if_dropped),
        })
    }

    fn set_handlers(&self, handlers: DeviceHandlers) {
        *self.handlers.lock() = Some(handlers);
    }

    fn clear_handlers(&self) {
        *self.handlers.lock() = None;
    }
}

impl Drop for PcapDevice {
    fn drop(&mut self) {
        if let Err(e) = self.stop_capture() {
            warn!("failed to stop {} on drop: {e}", self.info.id);
        }
        if let Err(e) = self.close() {
            warn!("failed to close {} on drop: {e}", self.info.id);
        }
    }
}
