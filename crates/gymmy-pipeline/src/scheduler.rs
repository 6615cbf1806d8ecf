//! Single-flight admission of camera frames into pose inference.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use gymmy_display::DisplaySink;
use gymmy_engine::PoseDetector;
use gymmy_types::{
    events::{FrameOutcome, PipelineEvent},
    frame::{FrameId, FrameLease, Rotation},
    telemetry::FrameCounters,
    Result,
};
use gymmy_vision::{composite, FrameConverter, OverlayStyle};
use tokio::{
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::pipeline_error;

/// Lock-free counters updated from both the frame and the completion context.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    received: AtomicU64,
    admitted: AtomicU64,
    dropped_busy: AtomicU64,
    no_payload: AtomicU64,
    conversion_failed: AtomicU64,
    rendered: AtomicU64,
    detection_failed: AtomicU64,
    rejected: AtomicU64,
    inference_ms_total: AtomicU64,
}

impl PipelineMetrics {
    fn counter(&self, outcome: FrameOutcome) -> &AtomicU64 {
        match outcome {
            FrameOutcome::Admitted => &self.admitted,
            FrameOutcome::DroppedBusy => &self.dropped_busy,
            FrameOutcome::NoPayload => &self.no_payload,
            FrameOutcome::ConversionFailed => &self.conversion_failed,
            FrameOutcome::Rendered => &self.rendered,
            FrameOutcome::DetectionFailed => &self.detection_failed,
            FrameOutcome::Rejected => &self.rejected,
        }
    }

    pub fn snapshot(&self) -> FrameCounters {
        FrameCounters {
            received: self.received.load(Ordering::SeqCst),
            admitted: self.admitted.load(Ordering::SeqCst),
            dropped_busy: self.dropped_busy.load(Ordering::SeqCst),
            no_payload: self.no_payload.load(Ordering::SeqCst),
            conversion_failed: self.conversion_failed.load(Ordering::SeqCst),
            rendered: self.rendered.load(Ordering::SeqCst),
            detection_failed: self.detection_failed.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
        }
    }

    /// Mean detector latency over completed inferences.
    pub fn mean_inference_ms(&self) -> Option<f64> {
        let completed =
            self.rendered.load(Ordering::SeqCst) + self.detection_failed.load(Ordering::SeqCst);
        (completed > 0).then(|| self.inference_ms_total.load(Ordering::SeqCst) as f64 / completed as f64)
    }
}

#[derive(Clone)]
struct Reporter {
    metrics: Arc<PipelineMetrics>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl Reporter {
    fn record(&self, frame: FrameId, outcome: FrameOutcome, latency_ms: Option<u64>) {
        self.metrics.counter(outcome).fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = latency_ms {
            self.metrics.inference_ms_total.fetch_add(ms, Ordering::SeqCst);
        }
        if let Some(events) = &self.events {
            let mut event = PipelineEvent::new(frame, outcome);
            event.latency_ms = latency_ms;
            let _ = events.send(event);
        }
    }
}

/// Holds the admitted frame for the lifetime of one inference.
///
/// Dropping it releases the frame and then clears the in-flight flag, on every exit path
/// including task abort and panic unwinding.
struct InFlight {
    lease: Option<FrameLease>,
    busy: Arc<AtomicBool>,
}

impl InFlight {
    fn lease(&self) -> Option<&FrameLease> {
        self.lease.as_ref()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        self.busy.store(false, Ordering::Release);
    }
}

/// Admits at most one frame at a time into the detector and drops the rest.
pub struct FrameScheduler<D, S>
where
    D: PoseDetector + 'static,
    S: DisplaySink + 'static,
{
    converter: FrameConverter,
    style: OverlayStyle,
    detector: Arc<D>,
    display: Arc<S>,
    busy: Arc<AtomicBool>,
    closing: AtomicBool,
    current: Mutex<Option<JoinHandle<()>>>,
    reporter: Reporter,
    runtime: Handle,
}

impl<D, S> FrameScheduler<D, S>
where
    D: PoseDetector + 'static,
    S: DisplaySink + 'static,
{
    /// Must be created inside a Tokio runtime; completions run on that runtime even when
    /// frames arrive from a non-runtime thread.
    pub fn new(
        converter: FrameConverter,
        style: OverlayStyle,
        detector: Arc<D>,
        display: Arc<S>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| pipeline_error(format!("scheduler needs a Tokio runtime: {err}")))?;
        Ok(Self {
            converter,
            style,
            detector,
            display,
            busy: Arc::new(AtomicBool::new(false)),
            closing: AtomicBool::new(false),
            current: Mutex::new(None),
            reporter: Reporter {
                metrics: Arc::new(PipelineMetrics::default()),
                events: None,
            },
            runtime,
        })
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.reporter.events = Some(events);
        self
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.reporter.metrics.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Decide the fate of one arriving frame. Never blocks on inference.
    pub fn on_frame(&self, lease: FrameLease) -> FrameOutcome {
        let id = lease.id();
        self.reporter
            .metrics
            .received
            .fetch_add(1, Ordering::SeqCst);

        if self.closing.load(Ordering::Acquire) {
            lease.release();
            debug!(frame = %id, "frame rejected, session closing");
            self.reporter.record(id, FrameOutcome::Rejected, None);
            return FrameOutcome::Rejected;
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            lease.release();
            debug!(frame = %id, "inference in flight, frame dropped");
            self.reporter.record(id, FrameOutcome::DroppedBusy, None);
            return FrameOutcome::DroppedBusy;
        }

        let guard = InFlight {
            lease: Some(lease),
            busy: self.busy.clone(),
        };

        let converted = guard.lease().and_then(|lease| {
            let frame = lease.frame();
            frame
                .image
                .as_ref()
                .map(|planar| self.converter.convert(planar, frame.rotation))
        });

        let image = match converted {
            None => {
                drop(guard);
                debug!(frame = %id, "frame carried no image payload");
                self.reporter.record(id, FrameOutcome::NoPayload, None);
                return FrameOutcome::NoPayload;
            }
            Some(Err(err)) => {
                drop(guard);
                warn!(frame = %id, error = %err, "frame conversion failed");
                self.reporter.record(id, FrameOutcome::ConversionFailed, None);
                return FrameOutcome::ConversionFailed;
            }
            Some(Ok(image)) => image,
        };

        self.reporter.record(id, FrameOutcome::Admitted, None);
        debug!(frame = %id, width = image.width(), height = image.height(), "frame admitted");

        let detector = self.detector.clone();
        let display = self.display.clone();
        let reporter = self.reporter.clone();
        let style = self.style;
        let handle = self.runtime.spawn(async move {
            let started = Instant::now();
            // The raster is already upright, so the detector gets no extra rotation.
            let result = detector.detect(&image, Rotation::Deg0).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(pose) => {
                    let overlay = composite(&image, &pose, &style);
                    display.present(overlay);
                    debug!(frame = %id, landmarks = pose.len(), latency_ms, "overlay rendered");
                    reporter.record(id, FrameOutcome::Rendered, Some(latency_ms));
                }
                Err(err) => {
                    warn!(frame = %id, error = %err, "pose detection failed, keeping previous overlay");
                    reporter.record(id, FrameOutcome::DetectionFailed, Some(latency_ms));
                }
            }
            drop(guard);
        });

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        FrameOutcome::Admitted
    }

    /// Stop admitting frames and wait for the outstanding inference.
    ///
    /// After `timeout` the inference is aborted; its frame is still released exactly once.
    /// Returns `false` when an abort was needed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.closing.store(true, Ordering::Release);
        let handle = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return true;
        };
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?timeout, "outstanding inference did not finish, aborting");
                handle.abort();
                let _ = handle.await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use gymmy_camera::{test_pattern, FrameLedger};
    use gymmy_engine::ScriptedDetector;
    use gymmy_types::{
        config::DetectorConfig,
        frame::{DecodedImage, RawFrame},
        pose::{LandmarkType, Pose},
        GymmyError,
    };
    use tokio::sync::Notify;

    /// Detector that blocks until the test opens the gate, then answers as scripted.
    struct GatedDetector {
        gate: Notify,
        calls: AtomicU64,
        fail: AtomicBool,
    }

    impl GatedDetector {
        fn new(fail: bool) -> Self {
            Self {
                gate: Notify::new(),
                calls: AtomicU64::new(0),
                fail: AtomicBool::new(fail),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PoseDetector for GatedDetector {
        async fn detect(&self, _image: &DecodedImage, _rotation: Rotation) -> Result<Pose> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail.load(Ordering::SeqCst) {
                Err(GymmyError::Detection("scripted".into()))
            } else {
                Ok(Pose::new()
                    .with(LandmarkType::LeftShoulder, 2.0, 2.0)
                    .with(LandmarkType::RightShoulder, 6.0, 2.0))
            }
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        frames: Mutex<Vec<DecodedImage>>,
    }

    impl RecordingDisplay {
        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl DisplaySink for RecordingDisplay {
        fn present(&self, image: DecodedImage) {
            self.frames.lock().unwrap().push(image);
        }
    }

    fn lease(ledger: &FrameLedger, id: u64) -> FrameLease {
        ledger.lease(RawFrame {
            id: FrameId(id),
            rotation: Rotation::Deg90,
            captured_at: Utc::now(),
            image: Some(test_pattern(16, 8, 4, 2, id)),
        })
    }

    fn scheduler<D: PoseDetector + 'static>(
        detector: Arc<D>,
        display: Arc<RecordingDisplay>,
    ) -> FrameScheduler<D, RecordingDisplay> {
        FrameScheduler::new(
            FrameConverter::default(),
            OverlayStyle::default(),
            detector,
            display,
        )
        .expect("scheduler")
    }

    async fn settle<D: PoseDetector + 'static, S: DisplaySink + 'static>(
        scheduler: &FrameScheduler<D, S>,
    ) {
        for _ in 0..100 {
            if !scheduler.is_busy() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("scheduler never became idle");
    }

    #[tokio::test]
    async fn only_one_frame_is_in_flight() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        assert_eq!(scheduler.on_frame(lease(&ledger, 0)), FrameOutcome::Admitted);
        tokio::task::yield_now().await;
        for id in 1..10 {
            assert_eq!(scheduler.on_frame(lease(&ledger, id)), FrameOutcome::DroppedBusy);
        }
        assert_eq!(detector.calls(), 1);
        assert!(scheduler.is_busy());
        let held = ledger.metrics();
        assert_eq!(held.released, 9);
        assert!(ledger.is_outstanding(FrameId(0)));

        detector.gate.notify_one();
        settle(&scheduler).await;

        let done = ledger.metrics();
        assert_eq!(done.released, 10);
        assert_eq!(done.outstanding, 0);
        assert_eq!(done.unexpected_releases, 0);
        assert_eq!(display.count(), 1);
        let counters = scheduler.metrics().snapshot();
        assert_eq!(counters.admitted, 1);
        assert_eq!(counters.dropped_busy, 9);
        assert_eq!(counters.rendered, 1);
    }

    #[tokio::test]
    async fn conversion_failure_releases_and_resets() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        let mut image = test_pattern(16, 8, 0, 2, 0);
        image.planes[0].data.truncate(10);
        let broken = ledger.lease(RawFrame {
            id: FrameId(1),
            rotation: Rotation::Deg0,
            captured_at: Utc::now(),
            image: Some(image),
        });

        assert_eq!(scheduler.on_frame(broken), FrameOutcome::ConversionFailed);
        assert!(!scheduler.is_busy());
        assert_eq!(detector.calls(), 0);
        assert_eq!(ledger.metrics().released, 1);
        assert_eq!(ledger.metrics().outstanding, 0);
    }

    #[tokio::test]
    async fn missing_payload_is_not_a_busy_drop() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        let empty = ledger.lease(RawFrame {
            id: FrameId(4),
            rotation: Rotation::Deg0,
            captured_at: Utc::now(),
            image: None,
        });
        assert_eq!(scheduler.on_frame(empty), FrameOutcome::NoPayload);
        assert!(!scheduler.is_busy());
        assert_eq!(ledger.metrics().released, 1);

        let counters = scheduler.metrics().snapshot();
        assert_eq!(counters.no_payload, 1);
        assert_eq!(counters.dropped_busy, 0);

        // The next frame is admitted straight away.
        assert_eq!(scheduler.on_frame(lease(&ledger, 5)), FrameOutcome::Admitted);
        detector.gate.notify_one();
        settle(&scheduler).await;
        assert_eq!(ledger.metrics().released, 2);
    }

    #[tokio::test]
    async fn detection_failure_keeps_previous_overlay() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        assert_eq!(scheduler.on_frame(lease(&ledger, 0)), FrameOutcome::Admitted);
        detector.gate.notify_one();
        settle(&scheduler).await;
        assert_eq!(display.count(), 1);
        let first = display.frames.lock().unwrap()[0].clone();

        detector.fail.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.on_frame(lease(&ledger, 1)), FrameOutcome::Admitted);
        detector.gate.notify_one();
        settle(&scheduler).await;

        let frames = display.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_raw(), first.as_raw());
        let metrics = ledger.metrics();
        assert_eq!(metrics.released, 2);
        assert_eq!(metrics.unexpected_releases, 0);
        let counters = scheduler.metrics().snapshot();
        assert_eq!(counters.rendered, 1);
        assert_eq!(counters.detection_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_still_waits_after_a_poisoned_lock() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        std::thread::scope(|scope| {
            let poisoned = scope
                .spawn(|| {
                    let _held = scheduler.current.lock();
                    panic!("poison the in-flight slot");
                })
                .join();
            assert!(poisoned.is_err());
        });
        assert!(scheduler.current.is_poisoned());

        assert_eq!(scheduler.on_frame(lease(&ledger, 0)), FrameOutcome::Admitted);
        // The handle must still be tracked, so drain waits and then aborts.
        assert!(!scheduler.drain(Duration::from_millis(50)).await);
        assert!(!scheduler.is_busy());
        assert_eq!(ledger.metrics().released, 1);
        assert_eq!(ledger.metrics().outstanding, 0);
    }

    #[tokio::test]
    async fn success_presents_rotated_overlay() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        scheduler.on_frame(lease(&ledger, 0));
        detector.gate.notify_one();
        settle(&scheduler).await;

        let frames = display.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        // 16x8 source rotated a quarter turn.
        assert_eq!(frames[0].dimensions(), (8, 16));
        assert_eq!(ledger.metrics().released, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn thirty_fps_against_200ms_inference() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(ScriptedDetector::new(DetectorConfig {
            latency_ms: 200,
            fail_every: 0,
        }));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        let start = tokio::time::Instant::now();
        let mut outcomes = Vec::new();
        for id in 0..10u64 {
            tokio::time::sleep_until(start + Duration::from_millis(33 * id)).await;
            outcomes.push(scheduler.on_frame(lease(&ledger, id)));
        }
        assert!(scheduler.drain(Duration::from_secs(1)).await);

        let admitted: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| **outcome == FrameOutcome::Admitted)
            .map(|(i, _)| i)
            .collect();
        // Frames at 0 ms and 231 ms find the detector idle; the rest arrive mid-inference.
        assert_eq!(admitted, vec![0, 7]);
        let counters = scheduler.metrics().snapshot();
        assert_eq!(counters.dropped_busy, 8);
        assert_eq!(counters.rendered, 2);
        assert_eq!(display.count(), 2);
        assert_eq!(detector.calls(), 2);
        assert_eq!(ledger.metrics().released, 10);
        assert_eq!(ledger.metrics().outstanding, 0);
        assert_eq!(scheduler.metrics().mean_inference_ms(), Some(200.0));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_a_stuck_inference_and_releases_once() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let scheduler = scheduler(detector.clone(), display.clone());

        assert_eq!(scheduler.on_frame(lease(&ledger, 0)), FrameOutcome::Admitted);
        assert!(!scheduler.drain(Duration::from_millis(50)).await);

        assert!(!scheduler.is_busy());
        let metrics = ledger.metrics();
        assert_eq!(metrics.released, 1);
        assert_eq!(metrics.unexpected_releases, 0);
        assert_eq!(display.count(), 0);

        assert_eq!(scheduler.on_frame(lease(&ledger, 1)), FrameOutcome::Rejected);
        assert_eq!(ledger.metrics().released, 2);
    }

    #[tokio::test]
    async fn events_are_reported_in_order() {
        let ledger = FrameLedger::new();
        let detector = Arc::new(GatedDetector::new(false));
        let display = Arc::new(RecordingDisplay::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = scheduler(detector.clone(), display.clone()).with_events(tx);

        scheduler.on_frame(lease(&ledger, 0));
        scheduler.on_frame(lease(&ledger, 1));
        detector.gate.notify_one();
        settle(&scheduler).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push((event.frame, event.outcome));
        }
        assert_eq!(
            seen,
            vec![
                (FrameId(0), FrameOutcome::Admitted),
                (FrameId(1), FrameOutcome::DroppedBusy),
                (FrameId(0), FrameOutcome::Rendered),
            ]
        );
    }
}
