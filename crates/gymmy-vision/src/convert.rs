//! Planar YUV 4:2:0 → NV21 → RGBA → upright raster.

use gymmy_types::{
    config::{ConverterConfig, Intermediate},
    frame::{DecodedImage, PlanarImage, Plane, Rotation},
    Result,
};
use image::{codecs::jpeg::JpegEncoder, imageops, DynamicImage, ImageFormat, Rgba};
use tracing::trace;

use crate::conversion_error;

/// Full-resolution luma (kept at its source row stride) followed by interleaved V/U pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedChroma {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub luma_row_stride: usize,
}

impl PackedChroma {
    /// Total NV21 length, or `None` when the geometry does not fit in memory.
    pub fn expected_len(width: u32, height: u32, luma_row_stride: usize) -> Option<usize> {
        let chroma = (width as usize).checked_mul(height as usize)? / 2;
        luma_row_stride
            .checked_mul(height as usize)?
            .checked_add(chroma)
    }

    fn chroma_start(&self) -> usize {
        self.luma_row_stride * self.height as usize
    }
}

/// Repack a strided planar frame into NV21 ordering (V before U).
pub fn pack_nv21(image: &PlanarImage) -> Result<PackedChroma> {
    let (width, height) = (image.width as usize, image.height as usize);
    if width == 0 || height == 0 {
        return Err(conversion_error(format!(
            "frame has empty dimensions {}x{}",
            image.width, image.height
        )));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(conversion_error(format!(
            "frame dimensions {}x{} are not even",
            image.width, image.height
        )));
    }
    if image.planes.len() < 3 {
        return Err(conversion_error(format!(
            "expected 3 planes, found {}",
            image.planes.len()
        )));
    }

    let luma = &image.planes[PlanarImage::LUMA];
    let u = &image.planes[PlanarImage::CHROMA_U];
    let v = &image.planes[PlanarImage::CHROMA_V];

    if luma.pixel_stride != 1 {
        return Err(conversion_error(format!(
            "luma pixel stride must be 1, got {}",
            luma.pixel_stride
        )));
    }
    if luma.row_stride < width {
        return Err(conversion_error(format!(
            "luma row stride {} is narrower than width {width}",
            luma.row_stride
        )));
    }
    let luma_len = luma.row_stride.checked_mul(height).ok_or_else(|| {
        conversion_error(format!(
            "luma row stride {} x height {height} overflows",
            luma.row_stride
        ))
    })?;
    if luma.data.len() < luma_len {
        return Err(conversion_error(format!(
            "luma plane holds {} bytes, stride {} x height {height} needs {luma_len}",
            luma.data.len(),
            luma.row_stride
        )));
    }

    let (chroma_width, chroma_height) = (width / 2, height / 2);
    check_chroma_plane("U", u, chroma_width, chroma_height)?;
    check_chroma_plane("V", v, chroma_width, chroma_height)?;

    let expected = PackedChroma::expected_len(image.width, image.height, luma.row_stride)
        .ok_or_else(|| conversion_error("NV21 length overflows"))?;
    let mut data = Vec::with_capacity(expected);
    data.extend_from_slice(&luma.data[..luma_len]);
    for row in 0..chroma_height {
        for col in 0..chroma_width {
            data.push(sample(v, row, col)?);
            data.push(sample(u, row, col)?);
        }
    }
    debug_assert_eq!(data.len(), expected);

    Ok(PackedChroma {
        data,
        width: image.width,
        height: image.height,
        luma_row_stride: luma.row_stride,
    })
}

fn check_chroma_plane(name: &str, plane: &Plane, width: usize, height: usize) -> Result<()> {
    if plane.pixel_stride == 0 {
        return Err(conversion_error(format!("{name} pixel stride is zero")));
    }
    let needed = plane
        .offset(height - 1, width - 1)
        .and_then(|last| last.checked_add(1))
        .ok_or_else(|| {
            conversion_error(format!(
                "{name} row stride {} / pixel stride {} overflows",
                plane.row_stride, plane.pixel_stride
            ))
        })?;
    if plane.data.len() < needed {
        return Err(conversion_error(format!(
            "{name} plane holds {} bytes, row stride {} / pixel stride {} needs {needed}",
            plane.data.len(),
            plane.row_stride,
            plane.pixel_stride
        )));
    }
    Ok(())
}

fn sample(plane: &Plane, row: usize, col: usize) -> Result<u8> {
    plane
        .offset(row, col)
        .and_then(|offset| plane.data.get(offset).copied())
        .ok_or_else(|| conversion_error(format!("chroma sample ({row}, {col}) out of bounds")))
}

/// Decode an NV21 buffer into RGBA using full-range BT.601 coefficients.
pub fn decode_nv21(packed: &PackedChroma) -> Result<DecodedImage> {
    let expected = PackedChroma::expected_len(packed.width, packed.height, packed.luma_row_stride)
        .ok_or_else(|| conversion_error("NV21 length overflows"))?;
    if packed.width == 0 || packed.height == 0 || packed.luma_row_stride < packed.width as usize {
        return Err(conversion_error(format!(
            "undecodable NV21 geometry {}x{} stride {}",
            packed.width, packed.height, packed.luma_row_stride
        )));
    }
    if packed.data.len() != expected {
        return Err(conversion_error(format!(
            "NV21 buffer is {} bytes, expected {expected}",
            packed.data.len()
        )));
    }

    let width = packed.width as usize;
    let chroma_start = packed.chroma_start();
    let image = DecodedImage::from_fn(packed.width, packed.height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = packed.data[y * packed.luma_row_stride + x];
        let pair = chroma_start + (y / 2) * width + (x / 2) * 2;
        let cr = packed.data[pair];
        let cb = packed.data[pair + 1];
        ycbcr_to_rgba(luma, cb, cr)
    });
    Ok(image)
}

fn ycbcr_to_rgba(y: u8, cb: u8, cr: u8) -> Rgba<u8> {
    let y = (y as i32) << 16;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;
    let round = 1 << 15;
    let r = (y + 91_881 * cr + round) >> 16;
    let g = (y - 22_554 * cb - 46_802 * cr + round) >> 16;
    let b = (y + 116_130 * cb + round) >> 16;
    Rgba([clamp_u8(r), clamp_u8(g), clamp_u8(b), 255])
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn jpeg_round_trip(image: &DecodedImage, quality: u8) -> Result<DecodedImage> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality)
        .encode_image(&rgb)
        .map_err(|err| conversion_error(format!("JPEG encode failed: {err}")))?;
    let decoded = image::load_from_memory_with_format(&encoded, ImageFormat::Jpeg)
        .map_err(|err| conversion_error(format!("JPEG decode failed: {err}")))?;
    Ok(decoded.to_rgba8())
}

/// Rotate clockwise by `rotation`; 90/270 swap the output dimensions.
pub fn rotate(image: &DecodedImage, rotation: Rotation) -> DecodedImage {
    match rotation {
        Rotation::Deg0 => image.clone(),
        Rotation::Deg90 => imageops::rotate90(image),
        Rotation::Deg180 => imageops::rotate180(image),
        Rotation::Deg270 => imageops::rotate270(image),
    }
}

/// Stateless converter parameterised by the intermediate representation.
#[derive(Debug, Clone, Default)]
pub struct FrameConverter {
    config: ConverterConfig,
}

impl FrameConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn convert(&self, image: &PlanarImage, rotation: Rotation) -> Result<DecodedImage> {
        let packed = pack_nv21(image)?;
        let mut decoded = decode_nv21(&packed)?;
        if self.config.intermediate == Intermediate::Jpeg {
            decoded = jpeg_round_trip(&decoded, self.config.jpeg_quality)?;
        }
        trace!(
            width = image.width,
            height = image.height,
            rotation = rotation.degrees(),
            "converted frame"
        );
        Ok(rotate(&decoded, rotation))
    }
}

/// Convert with the default raw intermediate.
pub fn convert(image: &PlanarImage, rotation: Rotation) -> Result<DecodedImage> {
    FrameConverter::default().convert(image, rotation)
}
