//! Pose inference engine abstraction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use gymmy_types::{
    config::DetectorConfig,
    frame::{DecodedImage, Rotation},
    pose::{Landmark, LandmarkType, Point2, Pose},
    GymmyError, Result,
};
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

/// Asynchronous single-image pose inference.
///
/// Implementations resolve each call exactly once with either a pose (possibly empty,
/// when nothing was found) or an error. `close` is called once, after the last `detect`.
#[async_trait]
pub trait PoseDetector: Send + Sync {
    async fn detect(&self, image: &DecodedImage, rotation: Rotation) -> Result<Pose>;
    async fn close(&self) -> Result<()>;
}

/// Detector with fixed latency that reports a standing figure scaled to the input.
pub struct ScriptedDetector {
    latency: Duration,
    fail_every: u64,
    calls: AtomicU64,
    closed: AtomicBool,
}

impl ScriptedDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            fail_every: config.fail_every,
            calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoseDetector for ScriptedDetector {
    async fn detect(&self, image: &DecodedImage, rotation: Rotation) -> Result<Pose> {
        if self.is_closed() {
            return Err(engine_error("detector used after close"));
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            call,
            width = image.width(),
            height = image.height(),
            rotation = rotation.degrees(),
            "scripted detection"
        );
        sleep(self.latency).await;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(engine_error(format!("scripted failure on call {call}")));
        }
        Ok(standing_pose(image.width(), image.height()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(engine_error("detector closed twice"));
        }
        info!(calls = self.calls(), "Scripted detector closed");
        Ok(())
    }
}

/// Upright figure centred in a `width` x `height` raster.
pub fn standing_pose(width: u32, height: u32) -> Pose {
    use LandmarkType::*;

    // (joint, x fraction, y fraction)
    const FIGURE: [(LandmarkType, f32, f32); 13] = [
        (Nose, 0.50, 0.12),
        (LeftShoulder, 0.62, 0.25),
        (RightShoulder, 0.38, 0.25),
        (LeftElbow, 0.68, 0.40),
        (RightElbow, 0.32, 0.40),
        (LeftWrist, 0.70, 0.54),
        (RightWrist, 0.30, 0.54),
        (LeftHip, 0.58, 0.55),
        (RightHip, 0.42, 0.55),
        (LeftKnee, 0.59, 0.73),
        (RightKnee, 0.41, 0.73),
        (LeftAnkle, 0.60, 0.90),
        (RightAnkle, 0.40, 0.90),
    ];

    FIGURE
        .iter()
        .map(|&(kind, fx, fy)| Landmark {
            kind,
            position: Point2::new(fx * width as f32, fy * height as f32),
            in_frame_likelihood: 0.99,
        })
        .collect()
}

pub fn engine_error(message: impl Into<String>) -> GymmyError {
    GymmyError::Detection(message.into())
}
