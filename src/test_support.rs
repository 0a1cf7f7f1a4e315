//! Synthetic scenes shared by the unit tests.

use crate::config::CounterConfig;
use crate::core_modules::frame::Frame;
use image::{GrayImage, Luma};

pub const ROAD: u8 = 40;
pub const CAR: u8 = 220;

/// A uniform frame.
pub fn scene(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([value]))
}

/// A copy of `base` with a filled square, clipped to the frame.
pub fn with_square(base: &GrayImage, x: u32, y: u32, size: u32, value: u8) -> GrayImage {
    let mut image = base.clone();
    for py in y..(y + size).min(image.height()) {
        for px in x..(x + size).min(image.width()) {
            image.put_pixel(px, py, Luma([value]));
        }
    }
    image
}

/// Small-frame configuration matching `approaching_vehicle`.
pub fn small_scene_config() -> CounterConfig {
    CounterConfig {
        min_blob_width: 15,
        min_blob_height: 15,
        line_position: 100,
        line_offset: 6,
        frame_delay_ms: 0,
        ..CounterConfig::default()
    }
}

/// 50 frames of empty road, then a 20x20 car driving down at 11 px per frame
/// from `y = 0` until its top passes `line + offset + 10` (116).
///
/// With the default blur and 5x5 morphology the blob centroid sits at
/// `y + 10`, so exactly one frame (`cy = 98`) lands in the (94, 106) band.
pub fn approaching_vehicle() -> Vec<Frame> {
    let road = scene(120, 200, ROAD);
    let mut frames: Vec<Frame> = (0..50).map(|_| Frame::from_gray(road.clone())).collect();
    let mut y = 0;
    while y <= 116 + 11 {
        frames.push(Frame::from_gray(with_square(&road, 50, y, 20, CAR)));
        y += 11;
    }
    frames
}
