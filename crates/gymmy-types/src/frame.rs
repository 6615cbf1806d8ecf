use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::{GymmyError, Result};

/// Mutable RGBA raster handed between the converter, compositor, and display.
pub type DecodedImage = RgbaImage;

/// Monotonic identifier assigned by the camera source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Clockwise rotation needed to bring a frame upright on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether applying this rotation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<u32> for Rotation {
    type Error = GymmyError;

    fn try_from(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(GymmyError::Conversion(format!(
                "unsupported rotation {other} (expected 0, 90, 180 or 270)"
            ))),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// One component plane of a planar image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows.
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row.
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Byte offset of sample (`row`, `col`) within this plane; `None` if it overflows.
    pub fn offset(&self, row: usize, col: usize) -> Option<usize> {
        plane_offset(row, col, self.row_stride, self.pixel_stride)
    }
}

/// Stride-aware addressing shared by every plane walk.
///
/// Strides come from the camera unchecked, so overflow yields `None` instead of wrapping.
pub fn plane_offset(
    row: usize,
    col: usize,
    row_stride: usize,
    pixel_stride: usize,
) -> Option<usize> {
    row.checked_mul(row_stride)?
        .checked_add(col.checked_mul(pixel_stride)?)
}

/// Planar YUV 4:2:0 image as delivered by the camera: luma, then U, then V.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarImage {
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
}

impl PlanarImage {
    pub const LUMA: usize = 0;
    pub const CHROMA_U: usize = 1;
    pub const CHROMA_V: usize = 2;
}

/// A single camera delivery. `image` is `None` when the source produced no payload.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub id: FrameId,
    pub rotation: Rotation,
    pub captured_at: DateTime<Utc>,
    pub image: Option<PlanarImage>,
}

/// Returns frames to the camera source once the pipeline is done with them.
pub trait FrameRecycler: Send + Sync {
    fn release(&self, id: FrameId);
}

/// Exclusive ownership of a [`RawFrame`] that hands it back to its source exactly once,
/// either through [`FrameLease::release`] or when the lease is dropped.
pub struct FrameLease {
    frame: RawFrame,
    recycler: Option<Arc<dyn FrameRecycler>>,
}

impl FrameLease {
    pub fn new(frame: RawFrame, recycler: Arc<dyn FrameRecycler>) -> Self {
        Self {
            frame,
            recycler: Some(recycler),
        }
    }

    pub fn id(&self) -> FrameId {
        self.frame.id
    }

    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler.release(self.frame.id);
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLease")
            .field("id", &self.frame.id)
            .field("released", &self.recycler.is_none())
            .finish()
    }
}
