// THEORY:
// Static configuration for a counting run. Every value is fixed when the pipeline
// is built; nothing is reconfigured mid-stream. The defaults reproduce the
// classic roadside setup: an 80x80 minimum vehicle box, a counting line at row
// 550 with a +/-6 pixel band, and a background model remembering 100 frames.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What to do with a frame that cannot be processed (wrong size, undecodable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedFramePolicy {
    /// Log the frame and carry on. The count is unaffected.
    #[default]
    Skip,
    /// Stop the run and return the error.
    Abort,
}

/// Tuning for the per-pixel mixture-of-Gaussians background model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Number of frames contributing to the adaptive estimate.
    pub history: u32,
    /// Squared Mahalanobis distance under which a pixel matches a background mode.
    pub var_threshold: f32,
    /// Classify darker, proportionally scaled pixels as shadow instead of foreground.
    pub detect_shadows: bool,
    /// Lowest brightness ratio (pixel / mode mean) still considered a shadow.
    pub shadow_threshold: f32,
    /// Portion of the total weight that makes up the background.
    pub background_ratio: f32,
    /// Squared distance under which a pixel updates an existing mode.
    pub var_threshold_gen: f32,
    /// Variance given to a freshly created mode.
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    /// Weight decay that prunes modes which stop being observed.
    pub complexity_reduction: f32,
    /// Upper bound on Gaussians kept per pixel.
    pub max_modes: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            history: 100,
            var_threshold: 50.0,
            detect_shadows: true,
            shadow_threshold: 0.5,
            background_ratio: 0.9,
            var_threshold_gen: 9.0,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            complexity_reduction: 0.05,
            max_modes: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Side of the square structuring neighbourhood. Must be odd.
    pub kernel_size: u32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self { kernel_size: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Radius of the smoothing window applied before background subtraction. 0 disables it.
    pub blur_radius: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { blur_radius: 2 }
    }
}

/// Complete configuration of a counting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub min_blob_width: u32,
    pub min_blob_height: u32,
    /// Row of the counting line, in pixels from the top of the frame.
    pub line_position: u32,
    /// Half-height of the detection band around the line.
    pub line_offset: u32,
    /// Pause between frames. Throttling only.
    pub frame_delay_ms: u64,
    /// Frames an uncounted centroid is retained. `None` keeps them forever.
    pub centroid_ttl_frames: Option<u64>,
    pub malformed_frames: MalformedFramePolicy,
    pub background: BackgroundConfig,
    pub mask: MaskConfig,
    pub preprocess: PreprocessConfig,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            min_blob_width: 80,
            min_blob_height: 80,
            line_position: 550,
            line_offset: 6,
            frame_delay_ms: 100,
            centroid_ttl_frames: Some(30),
            malformed_frames: MalformedFramePolicy::Skip,
            background: BackgroundConfig::default(),
            mask: MaskConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl CounterConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: CounterConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.line_offset == 0 {
            return Err(Error::Config("line_offset must be at least 1".into()));
        }
        if self.mask.kernel_size == 0 || self.mask.kernel_size % 2 == 0 {
            return Err(Error::Config(format!(
                "mask.kernel_size must be odd, got {}",
                self.mask.kernel_size
            )));
        }
        if self.mask.kernel_size / 2 > u8::MAX as u32 {
            return Err(Error::Config(format!(
                "mask.kernel_size {} is too large",
                self.mask.kernel_size
            )));
        }
        if self.centroid_ttl_frames == Some(0) {
            return Err(Error::Config(
                "centroid_ttl_frames must be at least 1 (use null to disable eviction)".into(),
            ));
        }
        self.background.validate()
    }
}

impl BackgroundConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("background.{msg}")));

        if self.history == 0 {
            return fail("history must be at least 1".into());
        }
        if !(self.var_threshold > 0.0) || !(self.var_threshold_gen > 0.0) {
            return fail("var_threshold and var_threshold_gen must be positive".into());
        }
        if !(self.var_min > 0.0) || self.var_min > self.var_max {
            return fail(format!(
                "variance bounds are inverted ({} > {})",
                self.var_min, self.var_max
            ));
        }
        if self.var_init < self.var_min || self.var_init > self.var_max {
            return fail(format!(
                "var_init {} lies outside [{}, {}]",
                self.var_init, self.var_min, self.var_max
            ));
        }
        if !(self.background_ratio > 0.0 && self.background_ratio <= 1.0) {
            return fail("background_ratio must lie in (0, 1]".into());
        }
        if !(self.shadow_threshold > 0.0 && self.shadow_threshold <= 1.0) {
            return fail("shadow_threshold must lie in (0, 1]".into());
        }
        if !(0.0..1.0).contains(&self.complexity_reduction) {
            return fail("complexity_reduction must lie in [0, 1)".into());
        }
        if !(1..=8).contains(&self.max_modes) {
            return fail(format!("max_modes must lie in 1..=8, got {}", self.max_modes));
        }
        Ok(())
    }
}
