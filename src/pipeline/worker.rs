//! The capture worker: drains the queue, numbers frames, publishes the
//! session collection and refreshes device statistics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::device::backend::CaptureDevice;
use crate::device::error::DeviceError;
use crate::device::types::RawFrame;
use crate::diagnostics::stats::SessionDiagnostics;
use crate::pipeline::error::{PipelineError, Result};
use crate::pipeline::fault::FaultSlot;
use crate::pipeline::packet::{PacketList, PacketSnapshot};
use crate::pipeline::queue::CaptureQueue;
use crate::pipeline::refresh::{StatisticsGate, StatisticsSnapshot};
use crate::pipeline::sink::PresentationSink;

/// How often a bounded join checks whether the worker has exited.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Cooperative stop request shared by the worker and whoever may end it.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    worker: OnceLock<Thread>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop and wake it if it is idling.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        if let Some(worker) = self.worker.get() {
            worker.unpark();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn attach(&self, worker: Thread) {
        let _ = self.worker.set(worker);
    }
}

/// Everything the worker reads or writes besides its own packet list.
pub struct WorkerContext {
    pub queue: Arc<CaptureQueue>,
    pub gate: Arc<StatisticsGate>,
    pub device: Arc<dyn CaptureDevice>,
    pub sink: Arc<dyn PresentationSink>,
    pub published: Arc<Mutex<PacketSnapshot>>,
    pub statistics: Arc<Mutex<Option<StatisticsSnapshot>>>,
    pub diagnostics: Arc<Mutex<SessionDiagnostics>>,
    pub faults: Arc<FaultSlot>,
    pub idle_interval: Duration,
}

/// Outcome of one worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing was pending.
    Idle,
    /// This many frames were wrapped and published.
    Drained(usize),
    /// A fatal error was reported; the loop must end.
    Faulted,
}

/// The worker's loop body, separated from its thread so it can be stepped
/// directly.
pub struct WorkerLoop {
    ctx: WorkerContext,
    packets: PacketList,
}

impl WorkerLoop {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            packets: PacketList::new(),
        }
    }

    /// Drain once and publish anything that arrived, then service a pending
    /// statistics refresh.
    ///
    /// The refresh is checked on idle steps too: an arrival can raise the flag
    /// after the drain that took its frame.
    pub fn step(&mut self) -> Step {
        let frames = self.ctx.queue.drain_all();
        if frames.is_empty() {
            return if self.service_refresh() {
                Step::Idle
            } else {
                Step::Faulted
            };
        }

        let bytes: usize = frames.iter().map(RawFrame::len).sum();
        let first = self.packets.next_sequence();
        let added = self.packets.wrap_all(frames);
        trace!("wrapped sequences {first}..{}", self.packets.next_sequence());

        let snapshot = self.packets.snapshot();
        *self.ctx.published.lock() = snapshot.clone();
        self.ctx.diagnostics.lock().record_drain(added, bytes);
        debug!(
            "drained {added} frames ({bytes} bytes), {} in session",
            snapshot.len()
        );

        if let Err(e) = self.ctx.sink.publish(&snapshot) {
            warn!("failed to publish {} packets: {e}", snapshot.len());
            self.ctx.diagnostics.lock().record_publish_failure();
        }

        if !self.service_refresh() {
            return Step::Faulted;
        }
        Step::Drained(added)
    }

    /// Refresh statistics if flagged. Returns `false` after reporting a fault.
    fn service_refresh(&self) -> bool {
        if !self.ctx.gate.take_pending() {
            return true;
        }
        match self.refresh_statistics() {
            Ok(()) => true,
            Err(e) => {
                self.ctx.faults.report(e.into());
                false
            }
        }
    }

    fn refresh_statistics(&self) -> std::result::Result<(), DeviceError> {
        let counters = self.ctx.device.statistics()?;
        *self.ctx.statistics.lock() = Some(StatisticsSnapshot::new(counters, SystemTime::now()));
        self.ctx.diagnostics.lock().record_statistics_refresh();
        debug!(
            "statistics: received={} dropped={} interface_dropped={}",
            counters.received, counters.dropped, counters.interface_dropped
        );
        if let Err(e) = self.ctx.sink.set_packets_count(counters.received) {
            warn!("failed to publish packet count: {e}");
            self.ctx.diagnostics.lock().record_publish_failure();
        }
        Ok(())
    }

    /// Run until `stop` is requested or a step faults.
    pub fn run(mut self, stop: &StopSignal) {
        let device_id = self.ctx.device.info().id.clone();
        info!("capture worker starting for {device_id}");
        let mut faulted = false;
        while !stop.is_requested() {
            match self.step() {
                Step::Idle => thread::park_timeout(self.ctx.idle_interval),
                Step::Drained(_) => {}
                Step::Faulted => {
                    faulted = true;
                    break;
                }
            }
        }
        // Delivery has stopped by now; publish what arrived before it did
        if !faulted {
            self.step();
        }
        info!(
            "capture worker exiting for {device_id} after {} packets",
            self.packets.len()
        );
    }
}

/// Owns the worker thread.
pub struct CaptureWorker {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Spawn the worker thread running `worker` until `signal` is requested.
    pub fn spawn(name: &str, worker: WorkerLoop, signal: Arc<StopSignal>) -> Result<Self> {
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name(format!("capture-{name}"))
            .spawn(move || worker.run(&thread_signal))
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;
        signal.attach(handle.thread().clone());
        Ok(Self {
            signal,
            thread: Some(handle),
        })
    }

    /// Request a stop. Ends an idle wait immediately.
    pub fn signal_stop(&self) {
        self.signal.request();
    }

    /// Whether the thread has exited (normally, by fault or by panic).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the thread to exit. A worker still running
    /// after the timeout is detached.
    pub fn join(mut self, timeout: Duration) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                error!("capture worker did not exit within {timeout:?}, detaching");
                return Err(PipelineError::WorkerStalled(timeout));
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        handle.join().map_err(|_| PipelineError::WorkerPanicked)
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.signal.request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::device::types::{DeviceId, LinkType};
    use crate::pipeline::error::PresentationError;
    use crate::pipeline::refresh::ManualClock;
    use crate::pipeline::sink::recording::RecordingSink;

    struct Harness {
        queue: Arc<CaptureQueue>,
        clock: Arc<ManualClock>,
        gate: Arc<StatisticsGate>,
        device: Arc<MockDevice>,
        sink: Arc<RecordingSink>,
        published: Arc<Mutex<PacketSnapshot>>,
        statistics: Arc<Mutex<Option<StatisticsSnapshot>>>,
        diagnostics: Arc<Mutex<SessionDiagnostics>>,
        faults: Arc<FaultSlot>,
    }

    impl Harness {
        fn new(device: MockDevice) -> Self {
            let clock = Arc::new(ManualClock::new());
            let device = Arc::new(device);
            device.open().unwrap();
            Self {
                queue: Arc::new(CaptureQueue::new()),
                gate: Arc::new(StatisticsGate::new(clock.clone(), Duration::from_secs(2))),
                clock,
                device,
                sink: Arc::new(RecordingSink::new()),
                published: Arc::new(Mutex::new(PacketSnapshot::empty())),
                statistics: Arc::new(Mutex::new(None)),
                diagnostics: Arc::new(Mutex::new(SessionDiagnostics::new())),
                faults: Arc::new(FaultSlot::new(DeviceId::new("mock0"), None)),
            }
        }

        fn worker(&self) -> WorkerLoop {
            WorkerLoop::new(WorkerContext {
                queue: Arc::clone(&self.queue),
                gate: Arc::clone(&self.gate),
                device: self.device.clone(),
                sink: self.sink.clone(),
                published: Arc::clone(&self.published),
                statistics: Arc::clone(&self.statistics),
                diagnostics: Arc::clone(&self.diagnostics),
                faults: Arc::clone(&self.faults),
                idle_interval: Duration::from_millis(10),
            })
        }

        fn frame(tag: u8) -> RawFrame {
            RawFrame::new(vec![tag; 4], SystemTime::now(), LinkType::Ethernet)
        }

        fn arrive(&self, tag: u8) {
            self.gate.on_arrival();
            self.queue.push(Self::frame(tag));
        }
    }

    #[test]
    fn empty_queue_is_an_idle_step() {
        let h = Harness::new(MockDevice::new("mock0"));
        let mut worker = h.worker();
        assert_eq!(worker.step(), Step::Idle);
        assert!(h.sink.publishes().is_empty());
    }

    #[test]
    fn drained_frames_are_numbered_and_published() {
        let h = Harness::new(MockDevice::new("mock0"));
        let mut worker = h.worker();
        h.arrive(10);
        h.arrive(11);
        assert_eq!(worker.step(), Step::Drained(2));
        h.arrive(12);
        assert_eq!(worker.step(), Step::Drained(1));

        let publishes = h.sink.publishes();
        assert_eq!(publishes.len(), 2);
        let last = &publishes[1];
        let seqs: Vec<u64> = last.in_arrival_order().iter().map(|p| p.sequence()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(last.get(2).map(|p| p.frame().data()[0]), Some(12));
        assert_eq!(h.published.lock().len(), 3);
        assert_eq!(h.diagnostics.lock().snapshot().drain_count, 2);
    }

    #[test]
    fn publish_failure_is_counted_and_loop_continues() {
        let h = Harness::new(MockDevice::new("mock0"));
        h.sink.fail_next_publishes(1);
        let mut worker = h.worker();
        h.arrive(1);
        assert_eq!(worker.step(), Step::Drained(1));
        h.arrive(2);
        assert_eq!(worker.step(), Step::Drained(1));

        assert_eq!(h.sink.publishes().len(), 1);
        assert_eq!(h.diagnostics.lock().publish_failures(), 1);
        assert!(!h.faults.is_set());
    }

    #[test]
    fn pending_refresh_samples_device_and_publishes_count() {
        let h = Harness::new(MockDevice::new("mock0"));
        h.device.set_statistics(crate::device::types::CaptureStatistics {
            received: 42,
            dropped: 3,
            interface_dropped: 0,
        });
        let mut worker = h.worker();

        h.arrive(1);
        worker.step();
        assert!(h.sink.counts().is_empty());
        assert!(h.statistics.lock().is_none());

        h.clock.advance(Duration::from_millis(2001));
        h.arrive(2);
        worker.step();
        assert_eq!(h.sink.counts(), vec![42]);
        let snapshot = h.statistics.lock().expect("statistics sampled");
        assert_eq!(snapshot.received, 42);
        assert_eq!(snapshot.dropped, 3);
        assert!(!h.gate.is_pending());
    }

    #[test]
    fn refresh_flagged_after_drain_runs_on_idle_step() {
        let h = Harness::new(MockDevice::new("mock0"));
        h.device.set_statistics(crate::device::types::CaptureStatistics {
            received: 7,
            dropped: 0,
            interface_dropped: 0,
        });
        let mut worker = h.worker();
        h.clock.advance(Duration::from_millis(2100));

        // The worker drains the frame before the arrival path flags the refresh
        h.queue.push(Harness::frame(1));
        assert_eq!(worker.step(), Step::Drained(1));
        h.gate.on_arrival();
        assert!(h.gate.is_pending());

        assert_eq!(worker.step(), Step::Idle);
        assert!(!h.gate.is_pending());
        assert_eq!(h.sink.counts(), vec![7]);
        assert_eq!(h.statistics.lock().map(|s| s.received), Some(7));

        for _ in 0..5 {
            assert_eq!(worker.step(), Step::Idle);
        }
        assert_eq!(h.device.call_count("statistics"), 1);
    }

    #[test]
    fn refresh_failure_on_idle_step_faults() {
        let device =
            MockDevice::new("mock0").with_error("statistics", DeviceError::Statistics("gone".into()));
        let h = Harness::new(device);
        let mut worker = h.worker();
        h.clock.advance(Duration::from_secs(3));
        h.gate.on_arrival();
        assert_eq!(worker.step(), Step::Faulted);
        assert!(h.faults.is_set());
    }

    #[test]
    fn statistics_failure_faults_the_worker() {
        let device =
            MockDevice::new("mock0").with_error("statistics", DeviceError::Statistics("gone".into()));
        let h = Harness::new(device);
        let mut worker = h.worker();
        h.clock.advance(Duration::from_secs(3));
        h.arrive(1);
        assert_eq!(worker.step(), Step::Faulted);
        assert_eq!(
            h.faults.take(),
            Some(PipelineError::Device(DeviceError::Statistics("gone".into())))
        );
        // The drained frames were still published before the fault
        assert_eq!(h.sink.publishes().len(), 1);
    }

    #[test]
    fn stop_signal_wakes_idle_worker() {
        let h = Harness::new(MockDevice::new("mock0"));
        let mut ctx_worker = h.worker();
        ctx_worker.ctx.idle_interval = Duration::from_secs(30);
        let signal = Arc::new(StopSignal::new());
        let worker = CaptureWorker::spawn("mock0", ctx_worker, Arc::clone(&signal)).unwrap();

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        worker.signal_stop();
        worker.join(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn running_worker_publishes_pushed_frames() {
        let h = Harness::new(MockDevice::new("mock0"));
        let signal = Arc::new(StopSignal::new());
        let worker = CaptureWorker::spawn("mock0", h.worker(), Arc::clone(&signal)).unwrap();
        for tag in 0..5 {
            h.arrive(tag);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while h.published.lock().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.signal_stop();
        worker.join(Duration::from_secs(5)).unwrap();
        assert_eq!(h.published.lock().len(), 5);
    }

    struct BlockingSink {
        release: AtomicBool,
    }

    impl PresentationSink for BlockingSink {
        fn set_packets_count(&self, _count: u64) -> std::result::Result<(), PresentationError> {
            Ok(())
        }

        fn publish(&self, _packets: &PacketSnapshot) -> std::result::Result<(), PresentationError> {
            while !self.release.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    #[test]
    fn join_times_out_on_stalled_worker() {
        let h = Harness::new(MockDevice::new("mock0"));
        let sink = Arc::new(BlockingSink {
            release: AtomicBool::new(false),
        });
        let mut worker_loop = h.worker();
        worker_loop.ctx.sink = sink.clone();
        let signal = Arc::new(StopSignal::new());
        let worker = CaptureWorker::spawn("mock0", worker_loop, Arc::clone(&signal)).unwrap();

        h.arrive(1);
        thread::sleep(Duration::from_millis(50));
        worker.signal_stop();
        let result = worker.join(Duration::from_millis(50));
        assert_eq!(
            result,
            Err(PipelineError::WorkerStalled(Duration::from_millis(50)))
        );
        sink.release.store(true, Ordering::Release);
    }
}
