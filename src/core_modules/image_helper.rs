use crate::core_modules::mask_processor::CleanMask;
use crate::error::Result;
use image::ImageEncoder;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Writes a clean mask as an 8-bit grayscale PNG.
pub fn save_mask(path: &Path, mask: &CleanMask) -> Result<()> {
    let output = BufWriter::new(File::create(path)?);
    let encoder = image::codecs::png::PngEncoder::new(output);
    let image = mask.as_image();

    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::L8,
    )?;

    Ok(())
}

/// File name used for the mask of a given frame inside a dump directory.
pub fn mask_path(dir: &Path, frame_index: u64) -> PathBuf {
    dir.join(format!("mask_{frame_index:06}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn saved_mask_reads_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = GrayImage::new(30, 20);
        for x in 5..15 {
            image.put_pixel(x, 7, Luma([255]));
        }
        let mask = CleanMask::from_binary(image);
        let path = mask_path(dir.path(), 42);

        save_mask(&path, &mask).expect("Error Saving File.");

        let decoded = image::open(&path).unwrap().to_luma8();
        assert_eq!(&decoded, mask.as_image());
        assert!(path.ends_with("mask_000042.png"));
    }
}
