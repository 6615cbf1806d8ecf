use async_trait::async_trait;
use chrono::Utc;
use gymmy_types::{
    config::CameraConfig,
    frame::{FrameId, FrameLease, PlanarImage, Plane, RawFrame, Rotation},
    Result,
};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::{camera_error, CameraMetrics, CameraSource, FrameLedger};

/// Paced camera producing a moving test pattern with camera-like stride layout.
pub struct SyntheticCamera {
    config: CameraConfig,
    rotation: Rotation,
    ledger: FrameLedger,
    ticker: Option<Interval>,
    next_id: u64,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let rotation = Rotation::try_from(config.rotation_degrees)
            .map_err(|err| camera_error(format!("invalid rotation hint: {err}")))?;
        if config.frame_rate == 0 {
            return Err(camera_error("frame rate must be greater than zero"));
        }
        Ok(Self {
            config,
            rotation,
            ledger: FrameLedger::new(),
            ticker: None,
            next_id: 0,
        })
    }

    pub fn ledger(&self) -> FrameLedger {
        self.ledger.clone()
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.frame_rate as f64)
    }

    fn exhausted(&self) -> bool {
        self.config
            .max_frames
            .map(|max| self.next_id >= max)
            .unwrap_or(false)
    }
}

#[async_trait]
impl CameraSource for SyntheticCamera {
    async fn start(&mut self) -> Result<()> {
        info!(
            width = self.config.width,
            height = self.config.height,
            fps = self.config.frame_rate,
            "Starting synthetic camera"
        );
        let mut ticker = interval(self.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<FrameLease>> {
        if self.exhausted() {
            return Ok(None);
        }
        let Some(ticker) = self.ticker.as_mut() else {
            return Ok(None);
        };
        ticker.tick().await;

        let id = FrameId(self.next_id);
        self.next_id += 1;
        let image = test_pattern(
            self.config.width,
            self.config.height,
            self.config.row_padding,
            self.config.chroma_pixel_stride,
            id.0,
        );
        debug!(frame = %id, "synthetic frame captured");
        Ok(Some(self.ledger.lease(RawFrame {
            id,
            rotation: self.rotation,
            captured_at: Utc::now(),
            image: Some(image),
        })))
    }

    async fn stop(&mut self) -> Result<()> {
        if self.ticker.take().is_some() {
            info!(delivered = self.next_id, "Synthetic camera stopped");
        }
        Ok(())
    }

    fn metrics(&self) -> CameraMetrics {
        self.ledger.metrics()
    }
}

/// Luma gradient with a bright vertical bar that advances with `phase`.
///
/// Every row of every plane carries `row_padding` trailing bytes. With a chroma pixel
/// stride of 2 the chroma planes mimic semi-planar hardware buffers, including the
/// missing final byte those buffers usually have.
pub fn test_pattern(
    width: u32,
    height: u32,
    row_padding: usize,
    chroma_pixel_stride: usize,
    phase: u64,
) -> PlanarImage {
    let (w, h) = (width as usize, height as usize);
    let luma_stride = w + row_padding;
    let bar = if w == 0 { 0 } else { (phase as usize * 4) % w };
    let mut luma = vec![0u8; luma_stride * h];
    for row in 0..h {
        for col in 0..w {
            let value = if col.abs_diff(bar) < 4 {
                235
            } else {
                (16 + (col * 200) / w.max(1)) as u8
            };
            luma[row * luma_stride + col] = value;
        }
    }

    let pixel_stride = chroma_pixel_stride.max(1);
    let chroma = |value: u8| {
        let stride = (w / 2) * pixel_stride + row_padding;
        let mut data = vec![value; stride * (h / 2)];
        if pixel_stride > 1 {
            data.pop();
        }
        Plane::new(data, stride, pixel_stride)
    };

    PlanarImage {
        width,
        height,
        planes: vec![Plane::new(luma, luma_stride, 1), chroma(110), chroma(150)],
    }
}
