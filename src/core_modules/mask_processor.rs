// THEORY:
// The `MaskProcessor` turns the speckled per-pixel foreground mask into solid
// regions. Shadows are dropped first, then a dilation merges nearby fragments
// and a closing (dilation followed by erosion) fills the small gaps left inside
// a silhouette. Both passes use the same square neighbourhood.
//
// Nearby fragments merge, so a single vehicle rarely splits into several blobs.
// Region boundaries grow by the neighbourhood radius.

use crate::config::MaskConfig;
use crate::core_modules::background_model::{BACKGROUND, FOREGROUND, ForegroundMask};
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, dilate};

/// Binary mask of contiguous foreground regions (0 or 255).
#[derive(Debug, Clone, PartialEq)]
pub struct CleanMask {
    image: GrayImage,
}

impl CleanMask {
    /// Any non-zero pixel is treated as foreground.
    pub fn from_binary(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            if pixel[0] != BACKGROUND {
                *pixel = Luma([FOREGROUND]);
            }
        }
        Self { image }
    }

    pub fn foreground_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == FOREGROUND).count()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

#[derive(Debug, Clone)]
pub struct MaskProcessor {
    /// Chebyshev radius of the square neighbourhood (kernel_size / 2).
    radius: u8,
}

impl MaskProcessor {
    pub fn new(config: &MaskConfig) -> Self {
        Self {
            radius: (config.kernel_size / 2).min(u8::MAX as u32) as u8,
        }
    }

    pub fn clean(&self, mask: &ForegroundMask) -> CleanMask {
        let hard = mask.hard_foreground();
        if self.radius == 0 {
            return CleanMask { image: hard };
        }

        let dilated = dilate(&hard, Norm::LInf, self.radius);
        CleanMask {
            image: close(&dilated, Norm::LInf, self.radius),
        }
    }
}
