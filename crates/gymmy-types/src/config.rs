use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{frame::Rotation, GymmyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub rotation_degrees: u32,
    /// Extra bytes appended to every row of every plane.
    #[serde(default)]
    pub row_padding: usize,
    /// 1 for fully planar chroma, 2 for interleaved (semi-planar) chroma buffers.
    #[serde(default = "default_chroma_pixel_stride")]
    pub chroma_pixel_stride: usize,
    pub max_frames: Option<u64>,
}

fn default_chroma_pixel_stride() -> usize {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intermediate {
    /// Decode NV21 samples straight into RGBA.
    #[default]
    Raw,
    /// Compress to JPEG and decode it again, as camera stacks commonly do.
    Jpeg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default)]
    pub intermediate: Intermediate,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    100
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            intermediate: Intermediate::Raw,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub latency_ms: u64,
    /// Fail every n-th detection; 0 never fails.
    #[serde(default)]
    pub fail_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub marker_radius: f32,
    pub stroke_width: f32,
    pub marker_color: [u8; 4],
    pub line_color: [u8; 4],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            marker_radius: 8.0,
            stroke_width: 5.0,
            marker_color: [0, 255, 0, 255],
            line_color: [255, 0, 0, 255],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub teardown_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GymmyConfig {
    pub camera: CameraConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    pub session: SessionConfig,
    pub ops: OpsConfig,
}

impl GymmyConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            GymmyError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            GymmyError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(GymmyError::Configuration(
                "camera.width and camera.height must be greater than zero".into(),
            ));
        }
        if self.camera.width % 2 != 0 || self.camera.height % 2 != 0 {
            return Err(GymmyError::Configuration(
                "camera.width and camera.height must be even for 4:2:0 chroma".into(),
            ));
        }
        if self.camera.frame_rate == 0 {
            return Err(GymmyError::Configuration(
                "camera.frame_rate must be greater than zero".into(),
            ));
        }
        Rotation::try_from(self.camera.rotation_degrees).map_err(|_| {
            GymmyError::Configuration(
                "camera.rotation_degrees must be one of 0, 90, 180, 270".into(),
            )
        })?;
        if !(1..=2).contains(&self.camera.chroma_pixel_stride) {
            return Err(GymmyError::Configuration(
                "camera.chroma_pixel_stride must be 1 or 2".into(),
            ));
        }
        if !(1..=100).contains(&self.converter.jpeg_quality) {
            return Err(GymmyError::Configuration(
                "converter.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        if self.overlay.marker_radius < 0.0 || self.overlay.stroke_width <= 0.0 {
            return Err(GymmyError::Configuration(
                "overlay.marker_radius must be >= 0 and overlay.stroke_width > 0".into(),
            ));
        }
        if self.session.teardown_timeout_ms == 0 {
            return Err(GymmyError::Configuration(
                "session.teardown_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn rotation(&self) -> Rotation {
        Rotation::try_from(self.camera.rotation_degrees).unwrap_or_default()
    }
}

impl Default for GymmyConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                width: 640,
                height: 480,
                frame_rate: 30,
                rotation_degrees: 90,
                row_padding: 0,
                chroma_pixel_stride: default_chroma_pixel_stride(),
                max_frames: Some(300),
            },
            converter: ConverterConfig::default(),
            detector: DetectorConfig {
                latency_ms: 60,
                fail_every: 0,
            },
            overlay: OverlayConfig::default(),
            session: SessionConfig {
                teardown_timeout_ms: 2_000,
            },
            ops: OpsConfig {
                log_level: "info".into(),
            },
        }
    }
}
