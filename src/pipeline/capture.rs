//! Capture session lifecycle.
//!
//! [`CapturePipeline`] wires a [`CaptureDevice`] to the capture queue and
//! worker, and owns the `Idle -> Capturing -> Idle` state machine. The queue,
//! worker thread and open device exist exactly while a session is active.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::device::backend::CaptureDevice;
use crate::device::error::DeviceError;
use crate::device::types::{DeviceHandlers, DeviceInfo, StopStatus};
use crate::diagnostics::stats::{DiagnosticSnapshot, SessionDiagnostics};
use crate::pipeline::error::{PipelineError, Result};
use crate::pipeline::fault::{ErrorCallback, FaultSlot};
use crate::pipeline::packet::PacketSnapshot;
use crate::pipeline::queue::CaptureQueue;
use crate::pipeline::refresh::{Clock, StatisticsGate, StatisticsSnapshot, SystemClock};
use crate::pipeline::sink::PresentationSink;
use crate::pipeline::worker::{CaptureWorker, StopSignal, WorkerContext, WorkerLoop};

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Capturing => f.write_str("capturing"),
        }
    }
}

/// Timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// How long the worker waits when the queue is empty.
    pub idle_interval: Duration,
    /// Minimum time between device statistics refreshes.
    pub statistics_interval: Duration,
    /// How long `stop` waits for the worker before detaching it.
    pub stop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(250),
            statistics_interval: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct ActiveSession {
    device: Arc<dyn CaptureDevice>,
    worker: CaptureWorker,
    faults: Arc<FaultSlot>,
}

/// Drives capture sessions against a presentation sink.
pub struct CapturePipeline {
    sink: Arc<dyn PresentationSink>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    on_error: Option<ErrorCallback>,
    published: Arc<Mutex<PacketSnapshot>>,
    statistics: Arc<Mutex<Option<StatisticsSnapshot>>>,
    diagnostics: Arc<Mutex<SessionDiagnostics>>,
    session: Option<ActiveSession>,
}

impl CapturePipeline {
    pub fn new(sink: Arc<dyn PresentationSink>, config: PipelineConfig) -> Self {
        Self {
            sink,
            config,
            clock: Arc::new(SystemClock),
            on_error: None,
            published: Arc::new(Mutex::new(PacketSnapshot::empty())),
            statistics: Arc::new(Mutex::new(None)),
            diagnostics: Arc::new(Mutex::new(SessionDiagnostics::new())),
            session: None,
        }
    }

    /// Replace the time source used for statistics scheduling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Called from the device or worker thread when a session faults.
    ///
    /// The callback is an early notice: it runs before anything is released,
    /// and the pipeline stays `Capturing` until [`CapturePipeline::check_health`]
    /// tears the session down and returns the fault. Owners should call
    /// `check_health` from their control thread once notified.
    pub fn with_error_callback(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn state(&self) -> PipelineState {
        if self.session.is_some() {
            PipelineState::Capturing
        } else {
            PipelineState::Idle
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The device of the active session.
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.session.as_ref().map(|s| s.device.info())
    }

    /// The most recently published collection. Survives `stop`.
    pub fn packets(&self) -> PacketSnapshot {
        self.published.lock().clone()
    }

    /// The last statistics sample. Survives `stop`; `None` before the first
    /// session.
    pub fn statistics(&self) -> Option<StatisticsSnapshot> {
        *self.statistics.lock()
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.diagnostics.lock().snapshot()
    }

    /// Open `device` and start a capture session on it.
    ///
    /// Fails with `InvalidState` unless idle. Any failure after the device is
    /// opened releases what was acquired and leaves the pipeline idle.
    pub fn start(&mut self, device: Arc<dyn CaptureDevice>) -> Result<()> {
        if self.session.is_some() {
            return Err(PipelineError::InvalidState {
                operation: "start",
                state: self.state(),
            });
        }
        let device_id = device.info().id.clone();
        info!("starting capture on {device_id}");
        self.reset();

        device.open()?;

        let queue = Arc::new(CaptureQueue::new());
        let gate = Arc::new(StatisticsGate::new(
            Arc::clone(&self.clock),
            self.config.statistics_interval,
        ));
        let signal = Arc::new(StopSignal::new());
        let faults = Arc::new(FaultSlot::new(device_id.clone(), self.on_error.clone()));
        device.set_handlers(Self::handlers(&queue, &gate, &signal, &faults));

        if let Err(e) = self.sample_statistics(device.as_ref()) {
            self.release_failed_start(device.as_ref(), None);
            return Err(e.into());
        }

        let worker_loop = WorkerLoop::new(WorkerContext {
            queue,
            gate,
            device: Arc::clone(&device),
            sink: Arc::clone(&self.sink),
            published: Arc::clone(&self.published),
            statistics: Arc::clone(&self.statistics),
            diagnostics: Arc::clone(&self.diagnostics),
            faults: Arc::clone(&faults),
            idle_interval: self.config.idle_interval,
        });
        let worker = match CaptureWorker::spawn(device_id.as_str(), worker_loop, signal) {
            Ok(worker) => worker,
            Err(e) => {
                self.release_failed_start(device.as_ref(), None);
                return Err(e);
            }
        };

        if let Err(e) = device.start_capture() {
            self.release_failed_start(device.as_ref(), Some(worker));
            return Err(e.into());
        }

        self.session = Some(ActiveSession {
            device,
            worker,
            faults,
        });
        info!("capture started on {device_id}");
        Ok(())
    }

    /// End the session: stop delivery, unregister handlers, stop and join the
    /// worker, then close the device. The pipeline is idle afterwards even
    /// when an error is returned.
    pub fn stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Err(PipelineError::InvalidState {
                operation: "stop",
                state: PipelineState::Idle,
            });
        };
        self.teardown(session)
    }

    /// Surface a fault raised on the device or worker thread.
    ///
    /// When the active session has faulted (or its worker died) the session
    /// is torn down and the fault returned. Otherwise a no-op.
    pub fn check_health(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        if !session.faults.is_set() && !session.worker.is_finished() {
            return Ok(());
        }
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let fault = session.faults.take();
        let teardown = self.teardown(session);
        match fault {
            Some(fault) => {
                if let Err(e) = teardown {
                    warn!("teardown after session fault also failed: {e}");
                }
                Err(fault)
            }
            None => teardown,
        }
    }

    fn reset(&self) {
        *self.published.lock() = PacketSnapshot::empty();
        *self.statistics.lock() = None;
        self.diagnostics.lock().reset();
        if let Err(e) = self.sink.publish(&PacketSnapshot::empty()) {
            warn!("failed to clear published packets: {e}");
        }
    }

    fn sample_statistics(&self, device: &dyn CaptureDevice) -> std::result::Result<(), DeviceError> {
        let counters = device.statistics()?;
        *self.statistics.lock() = Some(StatisticsSnapshot::new(counters, SystemTime::now()));
        if let Err(e) = self.sink.set_packets_count(counters.received) {
            warn!("failed to publish packet count: {e}");
        }
        Ok(())
    }

    /// Undo a partially completed `start`. The device is open and has
    /// handlers registered.
    fn release_failed_start(&self, device: &dyn CaptureDevice, worker: Option<CaptureWorker>) {
        let id = &device.info().id;
        device.clear_handlers();
        if let Some(worker) = worker {
            worker.signal_stop();
            if let Err(e) = worker.join(self.config.stop_timeout) {
                warn!("worker for {id} did not shut down after failed start: {e}");
            }
        }
        if let Err(e) = device.close() {
            warn!("failed to close {id} after failed start: {e}");
        }
    }

    fn handlers(
        queue: &Arc<CaptureQueue>,
        gate: &Arc<StatisticsGate>,
        signal: &Arc<StopSignal>,
        faults: &Arc<FaultSlot>,
    ) -> DeviceHandlers {
        let arrival_queue = Arc::clone(queue);
        let arrival_gate = Arc::clone(gate);
        let stop_signal = Arc::clone(signal);
        let stop_faults = Arc::clone(faults);
        DeviceHandlers {
            on_arrival: Arc::new(move |frame| {
                trace!("frame arrived: {} bytes", frame.len());
                // Flag before pushing so the drain that takes this frame sees it
                arrival_gate.on_arrival();
                arrival_queue.push(frame);
            }),
            on_stopped: Arc::new(move |status| match status {
                StopStatus::CompletedWithoutError => debug!("device reported capture stopped"),
                StopStatus::Error(reason) => {
                    stop_faults.report(DeviceError::AbnormalStop(reason).into());
                    stop_signal.request();
                }
            }),
        }
    }

    fn teardown(&self, session: ActiveSession) -> Result<()> {
        let ActiveSession { device, worker, .. } = session;
        let id = device.info().id.clone();
        let mut first_error: Option<PipelineError> = None;

        if let Err(e) = device.stop_capture() {
            error!("failed to stop capture on {id}: {e}");
            first_error.get_or_insert(e.into());
        }
        device.clear_handlers();

        worker.signal_stop();
        if let Err(e) = worker.join(self.config.stop_timeout) {
            error!("capture worker for {id}: {e}");
            first_error.get_or_insert(e);
        }

        if let Err(e) = device.close() {
            error!("failed to close {id}: {e}");
            first_error.get_or_insert(e.into());
        }

        info!("capture stopped on {id}");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.teardown(session) {
                warn!("capture teardown on drop failed: {e}");
            }
        }
    }
}
