use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gymmy_camera::CameraSource;
use gymmy_display::DisplaySink;
use gymmy_engine::PoseDetector;
use gymmy_ops::TelemetryStore;
use gymmy_types::{
    config::{GymmyConfig, SessionConfig},
    events::PipelineEvent,
    frame::FrameLease,
    telemetry::{FrameCounters, SessionSummary},
    Result,
};
use gymmy_vision::{FrameConverter, OverlayStyle};
use tokio::{sync::mpsc, task::JoinHandle, time::Duration};
use tracing::{debug, info, warn};

use crate::{pipeline_error, FrameScheduler, PipelineMetrics, SessionRunner};

/// One camera session wired to a detector and a display.
///
/// Teardown happens in [`PoseSession::shutdown`]: the camera stops first, the outstanding
/// inference is drained, and only then is the detector closed.
pub struct PoseSession<C, D, S>
where
    C: CameraSource,
    D: PoseDetector + 'static,
    S: DisplaySink + 'static,
{
    config: SessionConfig,
    camera: C,
    detector: Arc<D>,
    scheduler: Option<FrameScheduler<D, S>>,
    metrics: Arc<PipelineMetrics>,
    telemetry: TelemetryStore,
    forwarder: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

impl<C, D, S> PoseSession<C, D, S>
where
    C: CameraSource,
    D: PoseDetector + 'static,
    S: DisplaySink + 'static,
{
    pub fn new(
        config: &GymmyConfig,
        camera: C,
        detector: Arc<D>,
        display: Arc<S>,
        telemetry: TelemetryStore,
    ) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scheduler = FrameScheduler::new(
            FrameConverter::new(config.converter.clone()),
            OverlayStyle::from(&config.overlay),
            detector.clone(),
            display,
        )?
        .with_events(events_tx);
        let metrics = scheduler.metrics();
        let forwarder = tokio::spawn(forward_events(events_rx, telemetry.clone()));

        Ok(Self {
            config: config.session.clone(),
            camera,
            detector,
            scheduler: Some(scheduler),
            metrics,
            telemetry,
            forwarder: Some(forwarder),
            started_at: Utc::now(),
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        self.camera.start().await?;
        self.started_at = Utc::now();
        info!("Pose session started");
        Ok(())
    }

    pub fn counters(&self) -> FrameCounters {
        self.metrics.snapshot()
    }

    /// Like [`SessionRunner::run`], but also returns once `shutdown` resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                next = self.camera.next_frame() => next?,
            };
            let Some(lease) = next else {
                debug!("camera stream ended");
                return Ok(());
            };
            self.admit(lease)?;
        }
    }

    fn admit(&self, lease: FrameLease) -> Result<()> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| pipeline_error("session already shut down"))?;
        scheduler.on_frame(lease);
        Ok(())
    }

    /// Tear the session down and fold its counters into a summary.
    ///
    /// The detector is closed exactly once, after no inference can still reach it.
    pub async fn shutdown(mut self) -> Result<SessionSummary> {
        let stopped = self.camera.stop().await;
        if let Err(err) = &stopped {
            warn!(error = %err, "camera stop failed");
        }

        if let Some(scheduler) = self.scheduler.take() {
            let timeout = Duration::from_millis(self.config.teardown_timeout_ms);
            if !scheduler.drain(timeout).await {
                warn!(?timeout, "inference aborted during teardown");
            }
        }

        let closed = self.detector.close().await;
        if let Err(err) = &closed {
            warn!(error = %err, "detector close failed");
        }

        if let Some(forwarder) = self.forwarder.take() {
            if let Err(err) = forwarder.await {
                warn!(error = %err, "telemetry forwarder ended abnormally");
            }
        }

        let camera = self.camera.metrics();
        let summary = SessionSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            counters: self.metrics.snapshot(),
            frames_released: camera.released,
            mean_inference_ms: self.metrics.mean_inference_ms(),
        };
        self.telemetry.record_session(summary.clone()).await?;
        info!(
            received = summary.counters.received,
            admitted = summary.counters.admitted,
            dropped = summary.counters.dropped_busy,
            rendered = summary.counters.rendered,
            released = summary.frames_released,
            outstanding = camera.outstanding,
            "Pose session finished"
        );

        stopped?;
        closed?;
        Ok(summary)
    }
}

#[async_trait]
impl<C, D, S> SessionRunner for PoseSession<C, D, S>
where
    C: CameraSource,
    D: PoseDetector + 'static,
    S: DisplaySink + 'static,
{
    async fn run(&mut self) -> Result<()> {
        while let Some(lease) = self.camera.next_frame().await? {
            self.admit(lease)?;
        }
        debug!("camera stream ended");
        Ok(())
    }
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<PipelineEvent>, store: TelemetryStore) {
    while let Some(event) = events.recv().await {
        if let Err(err) = store.record_event(event).await {
            warn!(error = %err, "failed to record pipeline event");
        }
    }
}
