use gymmy_types::{
    config::OverlayConfig,
    frame::DecodedImage,
    pose::{Point2, Pose, SKELETON_EDGES},
};
use image::Rgba;

/// Marker and stroke parameters for the skeleton overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub marker_radius: f32,
    pub stroke_width: f32,
    pub marker_color: Rgba<u8>,
    pub line_color: Rgba<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from(&OverlayConfig::default())
    }
}

impl From<&OverlayConfig> for OverlayStyle {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            marker_radius: config.marker_radius,
            stroke_width: config.stroke_width,
            marker_color: Rgba(config.marker_color),
            line_color: Rgba(config.line_color),
        }
    }
}

/// Draw `pose` over a copy of `image`: a dot per detected joint, then a segment per
/// skeleton edge whose endpoints were both detected.
pub fn composite(image: &DecodedImage, pose: &Pose, style: &OverlayStyle) -> DecodedImage {
    let mut canvas = image.clone();

    for landmark in pose.landmarks() {
        fill_disc(
            &mut canvas,
            landmark.position,
            style.marker_radius,
            style.marker_color,
        );
    }

    for edge in SKELETON_EDGES.iter() {
        if let (Some(from), Some(to)) = (pose.get(edge.from), pose.get(edge.to)) {
            draw_segment(
                &mut canvas,
                from.position,
                to.position,
                style.stroke_width,
                style.line_color,
            );
        }
    }

    canvas
}

fn fill_disc(image: &mut DecodedImage, center: Point2, radius: f32, color: Rgba<u8>) {
    if !center.x.is_finite() || !center.y.is_finite() {
        return;
    }
    let Some((left, top, right, bottom)) = clip_box(
        center.x - radius,
        center.y - radius,
        center.x + radius,
        center.y + radius,
        image,
    ) else {
        return;
    };

    let radius_sq = radius * radius;
    for y in top..=bottom {
        for x in left..=right {
            let dx = x as f32 - center.x;
            let dy = y as f32 - center.y;
            if dx * dx + dy * dy <= radius_sq {
                image.put_pixel(x, y, color);
            }
        }
    }
}

fn draw_segment(image: &mut DecodedImage, a: Point2, b: Point2, width: f32, color: Rgba<u8>) {
    if ![a.x, a.y, b.x, b.y].iter().all(|v| v.is_finite()) {
        return;
    }
    let half = width / 2.0;
    let Some((left, top, right, bottom)) = clip_box(
        a.x.min(b.x) - half,
        a.y.min(b.y) - half,
        a.x.max(b.x) + half,
        a.y.max(b.y) + half,
        image,
    ) else {
        return;
    };

    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let half_sq = half * half;
    for y in top..=bottom {
        for x in left..=right {
            let (px, py) = (x as f32 - a.x, y as f32 - a.y);
            let t = if len_sq > 0.0 {
                ((px * dx + py * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (ex, ey) = (px - t * dx, py - t * dy);
            if ex * ex + ey * ey <= half_sq {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Intersect a float bounding box with the raster; `None` when nothing is visible.
fn clip_box(
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
    image: &DecodedImage,
) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = max_x.floor();
    let max_y = max_y.floor();
    if max_x < 0.0 || max_y < 0.0 || min_x > (width - 1) as f32 || min_y > (height - 1) as f32 {
        return None;
    }
    let left = min_x.ceil().max(0.0) as u32;
    let top = min_y.ceil().max(0.0) as u32;
    let right = max_x.min((width - 1) as f32) as u32;
    let bottom = max_y.min((height - 1) as f32) as u32;
    (left <= right && top <= bottom).then_some((left, top, right, bottom))
}
