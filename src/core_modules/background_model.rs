// THEORY:
// The `BackgroundModel` is the temporal layer of the counter. It learns, for every
// pixel independently, what the static scene looks like and flags the pixels that
// currently disagree with it.
//
// Each pixel keeps a small mixture of Gaussians over its intensity, sorted by
// weight. Heavily weighted modes describe the scene; light modes are transient
// things (a car passing over that pixel). Every frame:
// 1.  All weights decay, and the first mode close to the new sample absorbs it,
//     moving its mean and variance towards the sample.
// 2.  The pixel is background if it fell within `var_threshold` of one of the
//     modes that together make up `background_ratio` of the weight.
// 3.  Unmatched samples start a new mode, evicting the weakest one when full.
// 4.  Non-background pixels that look like a darker copy of a background mode
//     are reported as shadow, a third class kept out of the hard foreground.
//
// The learning rate shrinks from 1/2 to 1/history as frames accumulate, so the
// model must see frames strictly in temporal order. The very first frame seeds
// the model and is reported as all background.

use crate::config::BackgroundConfig;
use crate::error::{Error, Result};
use image::{GrayImage, Luma};

/// Mask value of a background pixel.
pub const BACKGROUND: u8 = 0;
/// Mask value of a shadow pixel.
pub const SHADOW: u8 = 127;
/// Mask value of a foreground pixel.
pub const FOREGROUND: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Background,
    Shadow,
    Foreground,
}

impl PixelClass {
    fn mask_value(self) -> u8 {
        match self {
            PixelClass::Background => BACKGROUND,
            PixelClass::Shadow => SHADOW,
            PixelClass::Foreground => FOREGROUND,
        }
    }
}

/// Three-class output of the background model for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask {
    image: GrayImage,
}

impl ForegroundMask {
    /// Wraps a 0 / 127 / 255 mask produced elsewhere.
    pub fn from_image(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn class_at(&self, x: u32, y: u32) -> PixelClass {
        match self.image.get_pixel(x, y)[0] {
            FOREGROUND => PixelClass::Foreground,
            SHADOW => PixelClass::Shadow,
            _ => PixelClass::Background,
        }
    }

    pub fn foreground_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == FOREGROUND).count()
    }

    pub fn shadow_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == SHADOW).count()
    }

    /// Binary mask with shadows dropped: 255 for foreground, 0 otherwise.
    pub fn hard_foreground(&self) -> GrayImage {
        let mut hard = self.image.clone();
        for pixel in hard.pixels_mut() {
            if pixel[0] != FOREGROUND {
                *pixel = Luma([BACKGROUND]);
            }
        }
        hard
    }

    /// The raw 0 / 127 / 255 mask.
    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    mean: f32,
    variance: f32,
}

/// Per-pixel adaptive mixture-of-Gaussians model of the static scene.
pub struct BackgroundModel {
    width: u32,
    height: u32,
    config: BackgroundConfig,
    /// `max_modes` slots per pixel, row-major.
    modes: Vec<Gaussian>,
    /// Number of live modes in each pixel's slots.
    mode_counts: Vec<u8>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(width: u32, height: u32, config: BackgroundConfig) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            modes: vec![Gaussian::default(); pixels * config.max_modes],
            mode_counts: vec![0; pixels],
            frames_seen: 0,
            config,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Updates the model with the next frame and classifies its pixels.
    pub fn apply(&mut self, frame: &GrayImage) -> Result<ForegroundMask> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::FrameDimensions {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        let mut mask = GrayImage::new(self.width, self.height);

        if self.frames_seen == 0 {
            self.seed(frame);
            self.frames_seen = 1;
            return Ok(ForegroundMask { image: mask });
        }

        self.frames_seen += 1;
        let horizon = (2 * self.frames_seen).min(self.config.history as u64);
        let alpha = 1.0 / horizon as f32;
        let max_modes = self.config.max_modes;

        for (index, (sample, out)) in frame.pixels().zip(mask.pixels_mut()).enumerate() {
            let slots = &mut self.modes[index * max_modes..(index + 1) * max_modes];
            let mut live = self.mode_counts[index] as usize;
            let class = update_pixel(slots, &mut live, sample[0] as f32, alpha, &self.config);
            self.mode_counts[index] = live as u8;
            *out = Luma([class.mask_value()]);
        }

        Ok(ForegroundMask { image: mask })
    }

    fn seed(&mut self, frame: &GrayImage) {
        let max_modes = self.config.max_modes;
        for (index, sample) in frame.pixels().enumerate() {
            self.modes[index * max_modes] = Gaussian {
                weight: 1.0,
                mean: sample[0] as f32,
                variance: self.config.var_init,
            };
            self.mode_counts[index] = 1;
        }
    }
}

fn update_pixel(
    modes: &mut [Gaussian],
    live: &mut usize,
    sample: f32,
    alpha: f32,
    config: &BackgroundConfig,
) -> PixelClass {
    let prune = -alpha * config.complexity_reduction;
    let mut background = false;
    let mut matched = false;
    let mut cumulative = 0.0;

    // --- 1. Decay, match and classify ---
    for mode in modes[..*live].iter_mut() {
        mode.weight = (1.0 - alpha) * mode.weight + prune;

        if !matched {
            let diff = sample - mode.mean;
            let dist2 = diff * diff;

            if cumulative < config.background_ratio && dist2 < config.var_threshold * mode.variance {
                background = true;
            }

            if dist2 < config.var_threshold_gen * mode.variance {
                matched = true;
                mode.weight += alpha;
                let rate = alpha / mode.weight;
                mode.mean += rate * diff;
                mode.variance = (mode.variance + rate * (dist2 - mode.variance))
                    .clamp(config.var_min, config.var_max);
            }
        }

        cumulative += mode.weight;
    }

    // --- 2. Drop modes that decayed away ---
    let mut kept = 0;
    for i in 0..*live {
        if modes[i].weight > 0.0 {
            modes[kept] = modes[i];
            kept += 1;
        }
    }
    *live = kept;

    // --- 3. Start a new mode for an unexplained sample ---
    if !matched {
        let slot = if *live < modes.len() {
            *live += 1;
            *live - 1
        } else {
            *live - 1
        };
        modes[slot] = Gaussian {
            weight: if *live == 1 { 1.0 } else { alpha },
            mean: sample,
            variance: config.var_init,
        };
    }

    // --- 4. Renormalise and restore weight order ---
    let active = &mut modes[..*live];
    let total: f32 = active.iter().map(|m| m.weight).sum();
    if total > 0.0 {
        for mode in active.iter_mut() {
            mode.weight /= total;
        }
    }
    active.sort_unstable_by(|a, b| b.weight.total_cmp(&a.weight));

    if background {
        PixelClass::Background
    } else if config.detect_shadows && is_shadow(active, sample, config) {
        PixelClass::Shadow
    } else {
        PixelClass::Foreground
    }
}

/// A shadow is a proportionally darker version of one of the background modes.
/// On a single channel the colour-distortion term vanishes, so the test reduces
/// to the brightness ratio.
fn is_shadow(modes: &[Gaussian], sample: f32, config: &BackgroundConfig) -> bool {
    let mut cumulative = 0.0;
    for mode in modes {
        if mode.mean <= f32::EPSILON {
            return false;
        }

        // A sample equal to the mode mean is that mode, not its shadow.
        let ratio = sample / mode.mean;
        if ratio >= config.shadow_threshold && ratio < 1.0 {
            let diff = ratio * mode.mean - sample;
            if diff * diff < config.var_threshold * mode.variance * ratio * ratio {
                return true;
            }
        }

        cumulative += mode.weight;
        if cumulative > config.background_ratio {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scene, with_square};

    const ROAD: u8 = 40;
    const CAR: u8 = 220;

    fn warmed_model(config: BackgroundConfig, frames: usize) -> BackgroundModel {
        let mut model = BackgroundModel::new(64, 64, config);
        let road = scene(64, 64, ROAD);
        for _ in 0..frames {
            model.apply(&road).unwrap();
        }
        model
    }

    #[test]
    fn first_frame_seeds_an_empty_mask() {
        let mut model = BackgroundModel::new(32, 32, BackgroundConfig::default());
        let frame = with_square(&scene(32, 32, ROAD), 4, 4, 10, CAR);
        let mask = model.apply(&frame).unwrap();
        assert_eq!(mask.foreground_pixels(), 0);
        assert_eq!(model.frames_seen(), 1);
    }

    #[test]
    fn static_scene_stays_background() {
        let mut model = warmed_model(BackgroundConfig::default(), 20);
        let mask = model.apply(&scene(64, 64, ROAD)).unwrap();
        assert_eq!(mask.foreground_pixels(), 0);
        assert_eq!(mask.shadow_pixels(), 0);
    }

    #[test]
    fn bright_square_is_foreground() {
        let mut model = warmed_model(BackgroundConfig::default(), 20);
        let frame = with_square(&scene(64, 64, ROAD), 10, 12, 16, CAR);
        let mask = model.apply(&frame).unwrap();

        assert_eq!(mask.foreground_pixels(), 16 * 16);
        assert_eq!(mask.class_at(10, 12), PixelClass::Foreground);
        assert_eq!(mask.class_at(25, 27), PixelClass::Foreground);
        assert_eq!(mask.class_at(9, 12), PixelClass::Background);
    }

    #[test]
    fn darker_copy_of_background_is_shadow() {
        let mut model = BackgroundModel::new(64, 64, BackgroundConfig::default());
        let bright_road = scene(64, 64, 200);
        for _ in 0..20 {
            model.apply(&bright_road).unwrap();
        }

        let frame = with_square(&bright_road, 8, 8, 10, 130);
        let mask = model.apply(&frame).unwrap();
        assert_eq!(mask.shadow_pixels(), 100);
        assert_eq!(mask.foreground_pixels(), 0);
        assert!(mask.hard_foreground().pixels().all(|p| p[0] == BACKGROUND));
    }

    #[test]
    fn shadows_are_foreground_when_detection_is_off() {
        let config = BackgroundConfig {
            detect_shadows: false,
            ..BackgroundConfig::default()
        };
        let mut model = BackgroundModel::new(64, 64, config);
        let bright_road = scene(64, 64, 200);
        for _ in 0..20 {
            model.apply(&bright_road).unwrap();
        }

        let mask = model.apply(&with_square(&bright_road, 8, 8, 10, 130)).unwrap();
        assert_eq!(mask.foreground_pixels(), 100);
    }

    #[test]
    fn parked_object_is_absorbed_into_background() {
        let config = BackgroundConfig {
            history: 4,
            ..BackgroundConfig::default()
        };
        let mut model = warmed_model(config, 3);
        let parked = with_square(&scene(64, 64, ROAD), 20, 20, 20, CAR);

        let first = model.apply(&parked).unwrap();
        assert_eq!(first.foreground_pixels(), 400);

        let mut last = first;
        for _ in 0..5 {
            last = model.apply(&parked).unwrap();
        }
        assert_eq!(last.foreground_pixels(), 0);
    }

    #[test]
    fn frame_order_changes_the_mask() {
        // A car drives in at frame 3 and waits at the same spot through frame 8.
        let config = BackgroundConfig {
            history: 4,
            ..BackgroundConfig::default()
        };
        let road = scene(64, 64, ROAD);
        let frames: Vec<GrayImage> = (0..9u32)
            .map(|i| {
                if i < 3 {
                    road.clone()
                } else {
                    let y = (i.min(5) - 3) * 10;
                    with_square(&road, 20, y, 20, CAR)
                }
            })
            .collect();

        let mut in_order = BackgroundModel::new(64, 64, config.clone());
        let mut in_order_mask = None;
        for frame in &frames {
            in_order_mask = Some(in_order.apply(frame).unwrap());
        }
        let in_order_mask = in_order_mask.unwrap();

        // Same frames, but frame 8 arrives before frame 3.
        let mut shuffled = BackgroundModel::new(64, 64, config);
        for frame in &frames[..3] {
            shuffled.apply(frame).unwrap();
        }
        let early_mask = shuffled.apply(&frames[8]).unwrap();

        assert!(in_order_mask.foreground_pixels() < 40);
        assert_eq!(early_mask.foreground_pixels(), 400);
        assert_ne!(in_order_mask, early_mask);
    }

    #[test]
    fn wrong_dimensions_are_rejected_without_touching_state() {
        let mut model = warmed_model(BackgroundConfig::default(), 2);
        let err = model.apply(&scene(32, 64, ROAD)).unwrap_err();
        assert!(matches!(err, Error::FrameDimensions { actual_width: 32, .. }));
        assert_eq!(model.frames_seen(), 2);
    }
}
