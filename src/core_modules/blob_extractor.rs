// THEORY:
// The `BlobExtractor` is the spatial grouping layer. It labels the 8-connected
// foreground regions of a clean mask and reduces each region to its bounding box.
//
// Boxes narrower than `min_width` or shorter than `min_height` are discarded.
// Both dimensions are checked independently; this is the main filter against
// sensor noise and small or distant motion. It is a stateless utility with no
// memory of previous frames, and the order of the returned blobs carries no
// meaning.

use crate::core_modules::blob::Blob;
use crate::core_modules::mask_processor::CleanMask;
use image::Luma;
use imageproc::region_labelling::{Connectivity, connected_components};

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Bounds {
    fn at(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn to_blob(self) -> Blob {
        Blob::new(
            self.min_x,
            self.min_y,
            self.max_x - self.min_x + 1,
            self.max_y - self.min_y + 1,
        )
    }
}

#[derive(Debug, Clone)]
pub struct BlobExtractor {
    min_width: u32,
    min_height: u32,
}

impl BlobExtractor {
    pub fn new(min_width: u32, min_height: u32) -> Self {
        Self {
            min_width,
            min_height,
        }
    }

    /// Bounding boxes of every connected region that passes the size filter.
    pub fn extract(&self, mask: &CleanMask) -> Vec<Blob> {
        self.bounding_boxes(mask)
            .into_iter()
            .filter(|blob| self.accepts(blob))
            .collect()
    }

    pub fn accepts(&self, blob: &Blob) -> bool {
        blob.width >= self.min_width && blob.height >= self.min_height
    }

    /// Bounding boxes of every 8-connected region, unfiltered.
    pub fn bounding_boxes(&self, mask: &CleanMask) -> Vec<Blob> {
        let labels = connected_components(mask.as_image(), Connectivity::Eight, Luma([0u8]));

        // Labels are dense, starting at 1; 0 is the background.
        let mut regions: Vec<Option<Bounds>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if label >= regions.len() {
                regions.resize(label + 1, None);
            }
            regions[label] = Some(match regions[label] {
                Some(mut bounds) => {
                    bounds.include(x, y);
                    bounds
                }
                None => Bounds::at(x, y),
            });
        }

        regions.into_iter().flatten().map(Bounds::to_blob).collect()
    }
}
