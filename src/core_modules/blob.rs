// THEORY:
// Plain data containers for the spatial layer. A `Blob` is the bounding box of one
// connected foreground region in a single frame; a `Centroid` is the point the
// counter watches. Neither carries identity across frames.

use serde::Serialize;

/// A point on the pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Centroid {
    pub cx: u32,
    pub cy: u32,
}

/// Axis-aligned bounding box of a connected foreground region, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Blob {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Blob {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Centre of the box, floored to the pixel grid.
    pub fn centroid(&self) -> Centroid {
        Centroid {
            cx: self.x + self.width / 2,
            cy: self.y + self.height / 2,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}
