//! Coordinate frames for detections.
//!
//! Three frames are involved:
//! 1. the normalized frame, `[0, 1] x [0, 1]` relative to the source photo;
//! 2. a display frame, where the photo is scaled to fit a container while keeping its aspect
//!    ratio and centered between letterbox bars;
//! 3. the pixel frame of the full-resolution source photo.
//!
//! Everything here is pure and allocation free.

use serde::{Deserialize, Serialize};

/// A detected region in normalized image-relative coordinates.
///
/// The bottom-right fields are redundant with `x + width` / `y + height` and are kept for
/// consumers that want corners. Every coordinate field is clamped to `[0, 1]` independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub x_bottom_right: f32,
    pub y_bottom_right: f32,
    /// Detector score. Only meaningful during a detection run; never persisted.
    pub confidence: f32,
    /// User selection flag. Freshly decoded boxes start selected.
    pub selected: bool,
    /// Rank-ordered identifier (`tree_1`, `tree_2`, ...), unique within one run.
    pub identifier: String,
}

impl NormalizedBox {
    /// Build a box from normalized corners, clamping each of the six coordinate fields on its
    /// own. Width and height are derived from the unclamped corners before clamping.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x: clamp_unit(x1),
            y: clamp_unit(y1),
            width: clamp_unit(x2 - x1),
            height: clamp_unit(y2 - y1),
            x_bottom_right: clamp_unit(x2),
            y_bottom_right: clamp_unit(y2),
            confidence,
            selected: true,
            identifier: String::new(),
        }
    }

    /// The persisted form of this box.
    pub fn to_record(&self) -> BoxRecord {
        BoxRecord {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Persisted tree bounding box in normalized origin/size form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoxRecord {
    pub fn x_bottom_right(&self) -> f32 {
        self.x + self.width
    }

    pub fn y_bottom_right(&self) -> f32 {
        self.y + self.height
    }

    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Persisted defect bounding box in normalized corner form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerBox {
    pub xtl: f32,
    pub ytl: f32,
    pub xbr: f32,
    pub ybr: f32,
}

impl CornerBox {
    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect {
            x: self.xtl,
            y: self.ytl,
            width: (self.xbr - self.xtl).max(0.0),
            height: (self.ybr - self.ytl).max(0.0),
        }
    }
}

/// Origin and size in the normalized frame, the common input of every frame conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Rectangle in display (container) units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DisplayRect {
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && py >= self.y && px <= self.x + self.width && py <= self.y + self.height
    }
}

/// Placement of a photo inside a container using "contain" semantics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainLayout {
    pub displayed_width: f32,
    pub displayed_height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ContainLayout {
    /// Fit an `image_width` x `image_height` photo into the container.
    ///
    /// Returns `None` when any dimension is zero or not finite.
    pub fn fit(
        image_width: u32,
        image_height: u32,
        container_width: f32,
        container_height: f32,
    ) -> Option<Self> {
        if image_width == 0
            || image_height == 0
            || !(container_width.is_finite() && container_width > 0.0)
            || !(container_height.is_finite() && container_height > 0.0)
        {
            return None;
        }

        let image_ratio = image_width as f32 / image_height as f32;
        let container_ratio = container_width / container_height;

        let layout = if image_ratio > container_ratio {
            let displayed_height = container_width / image_ratio;
            Self {
                displayed_width: container_width,
                displayed_height,
                offset_x: 0.0,
                offset_y: (container_height - displayed_height) / 2.0,
            }
        } else {
            let displayed_width = container_height * image_ratio;
            Self {
                displayed_width,
                displayed_height: container_height,
                offset_x: (container_width - displayed_width) / 2.0,
                offset_y: 0.0,
            }
        };
        Some(layout)
    }

    /// Map a normalized rectangle into the display frame. Offsets apply to the origin only.
    pub fn to_display(&self, rect: NormalizedRect) -> DisplayRect {
        DisplayRect {
            x: rect.x.mul_add(self.displayed_width, self.offset_x),
            y: rect.y.mul_add(self.displayed_height, self.offset_y),
            width: rect.width * self.displayed_width,
            height: rect.height * self.displayed_height,
        }
    }

    /// Map a display-frame point back to normalized coordinates.
    ///
    /// Points on the letterbox bars fall outside `[0, 1]` and yield `None`.
    pub fn to_normalized_point(&self, px: f32, py: f32) -> Option<(f32, f32)> {
        let nx = (px - self.offset_x) / self.displayed_width;
        let ny = (py - self.offset_y) / self.displayed_height;
        ((0.0..=1.0).contains(&nx) && (0.0..=1.0).contains(&ny)).then_some((nx, ny))
    }
}

/// Identifier of the topmost box under a display-frame point.
///
/// Boxes are rank ordered, so the first hit is the highest-confidence detection.
pub fn box_at_display_point<'a>(
    boxes: &'a [NormalizedBox],
    layout: &ContainLayout,
    px: f32,
    py: f32,
) -> Option<&'a str> {
    boxes
        .iter()
        .find(|b| layout.to_display(b.rect()).contains(px, py))
        .map(|b| b.identifier.as_str())
}

/// Integer crop rectangle in source pixels. Always non-empty and inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Unclamped rounded pixel coordinates of a normalized rectangle.
pub fn normalized_to_pixel(
    rect: NormalizedRect,
    image_width: u32,
    image_height: u32,
) -> (i64, i64, i64, i64) {
    let w = f64::from(image_width);
    let h = f64::from(image_height);
    (
        round_to_i64(f64::from(rect.x) * w),
        round_to_i64(f64::from(rect.y) * h),
        round_to_i64(f64::from(rect.width) * w),
        round_to_i64(f64::from(rect.height) * h),
    )
}

/// Convert a normalized rectangle into a valid crop rectangle.
///
/// The origin is clamped into the image and the size into `[1, remaining extent]`, so the result
/// is a non-empty in-bounds region for any input. Returns `None` only for a zero-sized image.
pub fn clamped_pixel_rect(
    rect: NormalizedRect,
    image_width: u32,
    image_height: u32,
) -> Option<PixelRect> {
    if image_width == 0 || image_height == 0 {
        return None;
    }
    let (px, py, pw, ph) = normalized_to_pixel(rect, image_width, image_height);
    let img_w = i64::from(image_width);
    let img_h = i64::from(image_height);

    let x = px.clamp(0, img_w - 1);
    let y = py.clamp(0, img_h - 1);
    let width = pw.clamp(1, img_w - x);
    let height = ph.clamp(1, img_h - y);

    Some(PixelRect {
        x: x as u32,
        y: y as u32,
        width: width as u32,
        height: height as u32,
    })
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn round_to_i64(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(i64::MIN as f64, i64::MAX as f64) as i64
}
