//! Rectangles in display-pixel and device-pixel space

use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest width or height (display pixels) a selection may have.
pub const MIN_SELECTION_EXTENT: f64 = 2.0;

/// Rectangle in display (logical) pixels, as reported by pointer events
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl DisplayRect {
    /// Build the normalized rectangle spanned by two corner points.
    ///
    /// The result does not depend on which corner is the anchor: dragging
    /// up-left yields the same rectangle as dragging down-right.
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        Self {
            x: a.0.min(b.0),
            y: a.1.min(b.1),
            w: (b.0 - a.0).abs(),
            h: (b.1 - a.1).abs(),
        }
    }

    /// True when the rectangle is too small to be recognized
    pub fn is_degenerate(&self) -> bool {
        !(self.w >= MIN_SELECTION_EXTENT && self.h >= MIN_SELECTION_EXTENT)
    }

    /// Convert to device pixels.
    ///
    /// Origin is rounded, extents are floored and clamped to at least 1 so the
    /// region never collapses to zero area after conversion.
    pub fn to_device(&self, dpr: f64) -> DeviceRect {
        DeviceRect {
            x: (self.x * dpr).round().max(0.0) as u32,
            y: (self.y * dpr).round().max(0.0) as u32,
            w: ((self.w * dpr).floor() as u32).max(1),
            h: ((self.h * dpr).floor() as u32).max(1),
        }
    }
}

/// Rectangle in device (raster) pixels; the only form used for cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl DeviceRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle covering a whole `width` x `height` image
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Intersection with a `width` x `height` image, or None if empty
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<DeviceRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.w.min(width - self.x);
        let h = self.h.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(DeviceRect::new(self.x, self.y, w, h))
    }
}

impl fmt::Display for DeviceRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}
