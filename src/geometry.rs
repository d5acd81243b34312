//! Coordinate spaces.
//!
//! Two spaces meet in this crate and mixing them up is the classic bug:
//!
//! * **Page space** ([`PagePoint`], [`PageRect`]): PDF points, 72 per inch,
//!   origin at the top-left of the page, y growing downwards. Table cell
//!   bounding boxes are expressed here.
//! * **Pixel space** ([`PixelPoint`], [`PixelRect`]): integer pixels of a
//!   rendered bitmap, same orientation.
//!
//! pdfium itself reports bottom-left-origin coordinates; the adapters in
//! `pipeline::extract` flip them once at the boundary so nothing downstream
//! ever sees them. [`PointToPixel`] is the single place where page space is
//! mapped into pixel space.

use serde::{Deserialize, Serialize};

/// A position in page space (points, top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PagePoint {
    pub x: f64,
    pub y: f64,
}

/// A position in pixel space. Signed so that padding can push it past the
/// image edge before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelPoint {
    pub x: i64,
    pub y: i64,
}

/// Axis-aligned rectangle in page space: `(x0, top)` is the top-left corner,
/// `(x1, bottom)` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageRect {
    pub x0: f64,
    pub top: f64,
    pub x1: f64,
    pub bottom: f64,
}

impl PageRect {
    pub fn new(x0: f64, top: f64, x1: f64, bottom: f64) -> Self {
        Self { x0, top, x1, bottom }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn top_left(&self) -> PagePoint {
        PagePoint {
            x: self.x0,
            y: self.top,
        }
    }

    pub fn bottom_right(&self) -> PagePoint {
        PagePoint {
            x: self.x1,
            y: self.bottom,
        }
    }

    /// All four coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.top.is_finite() && self.x1.is_finite() && self.bottom.is_finite()
    }

    /// Zero or negative extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        !(self.x1 > self.x0 && self.bottom > self.top)
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &PageRect) -> PageRect {
        PageRect {
            x0: self.x0.min(other.x0),
            top: self.top.min(other.top),
            x1: self.x1.max(other.x1),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }
}

/// Axis-aligned rectangle in pixel space. `right` and `lower` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub upper: u32,
    pub right: u32,
    pub lower: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.lower.saturating_sub(self.upper)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// Linear map from page space into the pixel space of one rendered bitmap.
///
/// The scale is derived from the actual bitmap dimensions rather than the
/// requested render factor, so rounding inside the rasteriser never shifts
/// a crop.
#[derive(Debug, Clone, Copy)]
pub struct PointToPixel {
    page: PageSize,
    image_width: u32,
    image_height: u32,
}

impl PointToPixel {
    pub fn new(page: PageSize, image_width: u32, image_height: u32) -> Self {
        Self {
            page,
            image_width,
            image_height,
        }
    }

    /// Map one point, rounding to the nearest pixel.
    pub fn map(&self, p: PagePoint) -> PixelPoint {
        let sx = self.image_width as f64 / self.page.width;
        let sy = self.image_height as f64 / self.page.height;
        PixelPoint {
            x: (p.x * sx).round() as i64,
            y: (p.y * sy).round() as i64,
        }
    }

    /// Pixel crop for `rect`, grown by `padding_px` on every side and clamped
    /// to the bitmap. `None` when nothing is left after clamping, or when the
    /// page has no usable size.
    pub fn crop_rect(&self, rect: &PageRect, padding_px: u32) -> Option<PixelRect> {
        if !(self.page.width > 0.0 && self.page.height > 0.0) {
            return None;
        }
        let tl = self.map(rect.top_left());
        let br = self.map(rect.bottom_right());
        let pad = padding_px as i64;
        let clamp_x = |v: i64| v.clamp(0, self.image_width as i64) as u32;
        let clamp_y = |v: i64| v.clamp(0, self.image_height as i64) as u32;

        let crop = PixelRect {
            left: clamp_x(tl.x - pad),
            upper: clamp_y(tl.y - pad),
            right: clamp_x(br.x + pad),
            lower: clamp_y(br.y + pad),
        };
        if crop.is_empty() {
            None
        } else {
            Some(crop)
        }
    }
}
