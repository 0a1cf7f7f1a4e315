// THEORY:
// A `Frame` is the immutable grid of intensity samples the pipeline consumes. It
// is always grayscale: colour input is reduced to luma on construction, so every
// downstream stage works on a single 8-bit channel.
//
// Raw buffers arrive in one of three packed layouts (the formats a video decoder
// typically emits). Colour pixels are collapsed with the Rec. 601 luma weights,
// the same perceived-brightness estimate used for motion heat maps.

use crate::error::{Error, Result};
use image::{DynamicImage, GrayImage};

/// Packed byte layout of a raw frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray,
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelLayout::Gray => "gray",
            PixelLayout::Rgb => "rgb24",
            PixelLayout::Rgba => "rgba",
        }
    }

    /// Bytes needed for one `width` x `height` frame.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Rec. 601 luma of an 8-bit RGB triple.
#[inline]
pub fn luminance(red: u8, green: u8, blue: u8) -> u8 {
    let luma = 0.299_f32 * red as f32 + 0.587_f32 * green as f32 + 0.114_f32 * blue as f32;
    luma.round().clamp(0.0, 255.0) as u8
}

/// A single grayscale video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: GrayImage,
}

impl Frame {
    pub fn from_gray(image: GrayImage) -> Self {
        Self { image }
    }

    /// Converts any decoded image to grayscale.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            image: image.to_luma8(),
        }
    }

    /// Builds a frame from a packed buffer, converting colour layouts to luma.
    pub fn from_raw(width: u32, height: u32, layout: PixelLayout, bytes: &[u8]) -> Result<Self> {
        let expected = layout.frame_len(width, height);
        if bytes.len() != expected {
            return Err(Error::FrameBufferSize {
                width,
                height,
                layout: layout.name(),
                expected,
                actual: bytes.len(),
            });
        }

        let luma: Vec<u8> = match layout {
            PixelLayout::Gray => bytes.to_vec(),
            PixelLayout::Rgb | PixelLayout::Rgba => bytes
                .chunks_exact(layout.bytes_per_pixel())
                .map(|px| luminance(px[0], px[1], px[2]))
                .collect(),
        };

        // Length was checked above, so the buffer always fits.
        GrayImage::from_raw(width, height, luma)
            .map(Self::from_gray)
            .ok_or(Error::FrameBufferSize {
                width,
                height,
                layout: layout.name(),
                expected,
                actual: bytes.len(),
            })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_gray(self) -> GrayImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn luminance_uses_rec601_weights() {
        assert_eq!(luminance(0, 0, 0), 0);
        assert_eq!(luminance(255, 255, 255), 255);
        assert_eq!(luminance(255, 0, 0), 76);
        assert_eq!(luminance(0, 255, 0), 150);
        assert_eq!(luminance(0, 0, 255), 29);
    }

    #[test]
    fn rgba_buffer_is_reduced_to_luma() {
        let bytes = [255, 0, 0, 255, 0, 255, 0, 255, 10, 10, 10, 0];
        let frame = Frame::from_raw(3, 1, PixelLayout::Rgba, &bytes).unwrap();
        assert_eq!(frame.as_gray().as_raw(), &vec![76, 150, 10]);
    }

    #[test]
    fn gray_buffer_is_copied_unchanged() {
        let bytes = [1, 2, 3, 4, 5, 6];
        let frame = Frame::from_raw(3, 2, PixelLayout::Gray, &bytes).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.as_gray().get_pixel(2, 1)[0], 6);
    }

    #[test]
    fn short_buffer_is_a_frame_error() {
        let err = Frame::from_raw(4, 4, PixelLayout::Rgb, &[0; 47]).unwrap_err();
        assert!(err.is_frame_error());
        assert!(matches!(err, Error::FrameBufferSize { expected: 48, actual: 47, .. }));
    }

    #[test]
    fn dynamic_colour_image_becomes_gray() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let frame = Frame::from_dynamic(DynamicImage::ImageRgb8(rgb));
        assert!(frame.as_gray().pixels().all(|p| p[0] == 255));
    }
}
