// THEORY:
// The `pipeline` module is the top-level API of the counter. It wires the stages
// together in their fixed order and owns every piece of state that lives longer
// than a frame: the background model, the observation set and the vehicle count.
// Nothing is global; a pipeline is an ordinary value that can be created, fed
// and dropped.
//
// The work is split into three stages so that the parallel pipeline can reuse
// them unchanged:
// 1.  **Detection** (stateful, strictly ordered): preprocessing and the
//     background model. Assigns frame indices.
// 2.  **Shaping** (stateless): mask cleanup and blob extraction.
// 3.  **Counting** (stateful, strictly ordered): centroid tracking, the
//     line-crossing rule and eviction of stale centroids.

use crate::config::{CounterConfig, MalformedFramePolicy};
use crate::core_modules::background_model::{BackgroundModel, ForegroundMask};
use crate::core_modules::blob::{Blob, Centroid};
use crate::core_modules::blob_extractor::BlobExtractor;
use crate::core_modules::centroid_tracker::{CentroidTracker, ObservationSet};
use crate::core_modules::frame::Frame;
use crate::core_modules::line_counter::{CrossingEvent, LineCrossingCounter};
use crate::core_modules::mask_processor::{CleanMask, MaskProcessor};
use crate::error::{Error, Result};
use crate::source::FrameSource;
use imageproc::filter::box_filter;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything the pipeline learned from one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Count after this frame was committed.
    pub vehicle_count: u64,
    /// Accepted blobs of this frame.
    pub blobs: Vec<Blob>,
    /// Centroids of this frame's blobs.
    pub centroids: Vec<Centroid>,
    pub crossings: Vec<CrossingEvent>,
    /// Observations still waiting after this frame.
    pub pending_observations: usize,
    pub evicted_observations: usize,
    /// Cleaned detection mask, for rendering collaborators.
    #[serde(skip)]
    pub clean_mask: CleanMask,
}

impl FrameReport {
    pub fn crossing_occurred(&self) -> bool {
        !self.crossings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    Cancelled,
}

/// Outcome of a complete run. `vehicle_count` is the authoritative result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub vehicle_count: u64,
    pub stop_reason: StopReason,
}

pub(crate) struct DetectedFrame {
    pub(crate) index: u64,
    pub(crate) mask: ForegroundMask,
}

pub(crate) struct ShapedFrame {
    pub(crate) index: u64,
    pub(crate) clean_mask: CleanMask,
    pub(crate) blobs: Vec<Blob>,
}

/// Preprocessing and background subtraction.
pub(crate) struct DetectionStage {
    config: CounterConfig,
    background: Option<BackgroundModel>,
    next_index: u64,
}

impl DetectionStage {
    pub(crate) fn new(config: &CounterConfig) -> Self {
        Self {
            config: config.clone(),
            background: None,
            next_index: 0,
        }
    }

    pub(crate) fn frames_detected(&self) -> u64 {
        self.next_index
    }

    pub(crate) fn detect(&mut self, frame: &Frame) -> Result<DetectedFrame> {
        let model = match &mut self.background {
            Some(model) => model,
            slot => {
                let (width, height) = frame.dimensions();
                if self.config.line_position >= height {
                    warn!(
                        "Counting line at row {} lies outside the {}x{} frame; nothing will be counted",
                        self.config.line_position, width, height
                    );
                }
                info!("Background model initialised for {}x{} frames", width, height);
                slot.insert(BackgroundModel::new(width, height, self.config.background.clone()))
            }
        };

        if frame.dimensions() != model.dimensions() {
            let (expected_width, expected_height) = model.dimensions();
            return Err(Error::FrameDimensions {
                expected_width,
                expected_height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        let radius = self.config.preprocess.blur_radius;
        let mask = if radius > 0 {
            model.apply(&box_filter(frame.as_gray(), radius, radius))?
        } else {
            model.apply(frame.as_gray())?
        };

        let index = self.next_index;
        self.next_index += 1;
        Ok(DetectedFrame { index, mask })
    }
}

/// Mask cleanup and blob extraction. Holds no per-frame state.
#[derive(Debug, Clone)]
pub(crate) struct ShapeStage {
    mask_processor: MaskProcessor,
    blob_extractor: BlobExtractor,
}

impl ShapeStage {
    pub(crate) fn new(config: &CounterConfig) -> Self {
        Self {
            mask_processor: MaskProcessor::new(&config.mask),
            blob_extractor: BlobExtractor::new(config.min_blob_width, config.min_blob_height),
        }
    }

    pub(crate) fn shape(&self, detected: DetectedFrame) -> ShapedFrame {
        let clean_mask = self.mask_processor.clean(&detected.mask);
        let blobs = self.blob_extractor.extract(&clean_mask);
        ShapedFrame {
            index: detected.index,
            clean_mask,
            blobs,
        }
    }
}

/// Centroid tracking and the line-crossing rule.
pub(crate) struct CountingStage {
    tracker: CentroidTracker,
    counter: LineCrossingCounter,
}

impl CountingStage {
    pub(crate) fn new(config: &CounterConfig) -> Self {
        Self {
            tracker: CentroidTracker::new(config.centroid_ttl_frames),
            counter: LineCrossingCounter::new(config.line_position, config.line_offset),
        }
    }

    pub(crate) fn vehicle_count(&self) -> u64 {
        self.counter.count()
    }

    pub(crate) fn commit(&mut self, shaped: ShapedFrame) -> FrameReport {
        let centroids = self.tracker.track(shaped.index, &shaped.blobs);
        let crossings = self.counter.evaluate(self.tracker.observations_mut());
        let evicted = self.tracker.evict_stale(shaped.index);

        debug!(
            "Frame {}: {} blobs, {} crossings, {} pending, count {}",
            shaped.index,
            shaped.blobs.len(),
            crossings.len(),
            self.tracker.observations().len(),
            self.counter.count()
        );

        FrameReport {
            frame_index: shaped.index,
            vehicle_count: self.counter.count(),
            blobs: shaped.blobs,
            centroids,
            crossings,
            pending_observations: self.tracker.observations().len(),
            evicted_observations: evicted,
            clean_mask: shaped.clean_mask,
        }
    }
}

/// The single-threaded, frame-sequential counting pipeline.
pub struct CountingPipeline {
    config: CounterConfig,
    detection: DetectionStage,
    shaping: ShapeStage,
    counting: CountingStage,
}

impl CountingPipeline {
    pub fn new(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detection: DetectionStage::new(&config),
            shaping: ShapeStage::new(&config),
            counting: CountingStage::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Runs one frame through every stage. A malformed frame leaves all state untouched.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        let detected = self.detection.detect(frame)?;
        let shaped = self.shaping.shape(detected);
        Ok(self.counting.commit(shaped))
    }

    pub fn vehicle_count(&self) -> u64 {
        self.counting.vehicle_count()
    }

    pub fn observations(&self) -> &ObservationSet {
        self.counting.tracker.observations()
    }

    pub fn frames_processed(&self) -> u64 {
        self.detection.frames_detected()
    }

    /// Drains `source` until end-of-stream or until `shutdown` becomes true,
    /// handing every report to `on_report`. Cancellation is only observed
    /// between frames.
    pub async fn run<S, F>(
        &mut self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    ) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        F: FnMut(&FrameReport) -> Result<()>,
    {
        let policy = self.config.malformed_frames;
        let delay = Duration::from_millis(self.config.frame_delay_ms);
        let mut skipped = 0;

        let stop_reason = loop {
            if *shutdown.borrow() {
                break StopReason::Cancelled;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::EndOfStream,
                Err(err) => {
                    absorb_frame_error(policy, err, &mut skipped)?;
                    continue;
                }
            };

            match self.process_frame(&frame) {
                Ok(report) => on_report(&report)?,
                Err(err) => absorb_frame_error(policy, err, &mut skipped)?,
            }

            if !delay.is_zero() {
                pause(delay, &mut shutdown).await;
            }
        };

        let summary = RunSummary {
            frames_processed: self.frames_processed(),
            frames_skipped: skipped,
            vehicle_count: self.vehicle_count(),
            stop_reason,
        };
        log_summary(&summary);
        Ok(summary)
    }
}

/// Applies the malformed-frame policy: skipped frame errors become `Ok`.
pub(crate) fn absorb_frame_error(
    policy: MalformedFramePolicy,
    err: Error,
    skipped: &mut u64,
) -> Result<()> {
    if err.is_frame_error() && policy == MalformedFramePolicy::Skip {
        *skipped += 1;
        warn!("Skipping malformed frame: {}", err);
        Ok(())
    } else {
        Err(err)
    }
}

/// Sleeps for `delay`, returning early if cancellation is signalled.
pub(crate) async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    tokio::select! {
        _ = &mut sleep => {}
        changed = shutdown.changed() => {
            // A dropped sender can no longer cancel; finish the pause.
            if changed.is_err() {
                sleep.await;
            }
        }
    }
}

pub(crate) fn log_summary(summary: &RunSummary) {
    match summary.stop_reason {
        StopReason::EndOfStream => info!("End of stream after {} frames", summary.frames_processed),
        StopReason::Cancelled => info!("Cancelled after {} frames", summary.frames_processed),
    }
    if summary.frames_skipped > 0 {
        warn!("{} malformed frames were skipped", summary.frames_skipped);
    }
    info!("Final vehicle count: {}", summary.vehicle_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::test_support::{CAR, ROAD, approaching_vehicle, scene, small_scene_config, with_square};

    fn running() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn car_driving_over_the_line_is_counted_once() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let mut crossing_frames = Vec::new();

        for frame in approaching_vehicle() {
            let report = pipeline.process_frame(&frame).unwrap();
            if report.crossing_occurred() {
                crossing_frames.push(report.frame_index);
            }
        }

        assert_eq!(pipeline.vehicle_count(), 1);
        assert_eq!(crossing_frames, vec![58]);
    }

    #[test]
    fn report_describes_the_blob_and_its_centroid() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let frames = approaching_vehicle();
        let mut last = None;
        // Empty road plus the car at y = 22.
        for frame in &frames[..53] {
            last = Some(pipeline.process_frame(frame).unwrap());
        }
        let report = last.unwrap();

        assert_eq!(report.frame_index, 52);
        assert_eq!(report.blobs, vec![Blob::new(46, 18, 28, 28)]);
        assert_eq!(report.centroids, vec![Centroid { cx: 60, cy: 32 }]);
        assert!(!report.crossing_occurred());
        assert_eq!(report.vehicle_count, 0);
        assert!(report.clean_mask.foreground_pixels() > 0);
    }

    #[test]
    fn small_motion_never_reaches_the_tracker() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let road = scene(120, 200, ROAD);
        for _ in 0..30 {
            pipeline.process_frame(&Frame::from_gray(road.clone())).unwrap();
        }

        // A 4x4 speck right on the line.
        let report = pipeline
            .process_frame(&Frame::from_gray(with_square(&road, 60, 98, 4, CAR)))
            .unwrap();
        assert!(report.blobs.is_empty());
        assert!(report.centroids.is_empty());
        assert!(pipeline.observations().is_empty());
        assert_eq!(pipeline.vehicle_count(), 0);
    }

    #[test]
    fn wrong_sized_frame_leaves_state_untouched() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        pipeline.process_frame(&Frame::from_gray(scene(120, 200, ROAD))).unwrap();

        let err = pipeline.process_frame(&Frame::from_gray(scene(60, 200, ROAD))).unwrap_err();
        assert!(err.is_frame_error());
        assert_eq!(pipeline.frames_processed(), 1);
    }

    #[tokio::test]
    async fn run_reports_every_frame_and_the_final_count() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let mut source = MemorySource::from(approaching_vehicle());
        let (_tx, rx) = running();

        let mut indices = Vec::new();
        let summary = pipeline
            .run(&mut source, rx, |report| {
                indices.push(report.frame_index);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(summary.vehicle_count, 1);
        assert_eq!(summary.frames_processed, 62);
        assert_eq!(summary.frames_skipped, 0);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(indices, (0..62).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_without_affecting_the_count() {
        let mut frames = approaching_vehicle();
        frames.insert(55, Frame::from_gray(scene(10, 10, ROAD)));
        let mut source = MemorySource::from(frames);
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let (_tx, rx) = running();

        let summary = pipeline.run(&mut source, rx, |_| Ok(())).await.unwrap();
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.frames_processed, 62);
        assert_eq!(summary.vehicle_count, 1);
    }

    #[tokio::test]
    async fn malformed_frame_aborts_when_configured() {
        let config = CounterConfig {
            malformed_frames: MalformedFramePolicy::Abort,
            ..small_scene_config()
        };
        let mut source = MemorySource::from(vec![
            Frame::from_gray(scene(120, 200, ROAD)),
            Frame::from_gray(scene(10, 10, ROAD)),
        ]);
        let mut pipeline = CountingPipeline::new(config).unwrap();
        let (_tx, rx) = running();

        let err = pipeline.run(&mut source, rx, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::FrameDimensions { .. }));
    }

    #[tokio::test]
    async fn cancelled_run_stops_between_frames() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let mut source = MemorySource::from(approaching_vehicle());
        let (tx, rx) = running();

        let summary = pipeline
            .run(&mut source, rx, |report| {
                if report.frame_index == 9 {
                    let _ = tx.send(true);
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.frames_processed, 10);
        assert_eq!(summary.vehicle_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_cut_short_by_cancellation() {
        let config = CounterConfig {
            frame_delay_ms: 60_000,
            ..small_scene_config()
        };
        let mut pipeline = CountingPipeline::new(config).unwrap();
        let mut source = MemorySource::from(vec![
            Frame::from_gray(scene(120, 200, ROAD)),
            Frame::from_gray(scene(120, 200, ROAD)),
        ]);
        let (tx, rx) = running();

        let run = pipeline.run(&mut source, rx, |_| Ok(()));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(true).unwrap();
        };
        let (summary, ()) = tokio::join!(run, cancel);

        let summary = summary.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.frames_processed, 1);
    }

    #[tokio::test]
    async fn report_callback_errors_end_the_run() {
        let mut pipeline = CountingPipeline::new(small_scene_config()).unwrap();
        let mut source = MemorySource::from(approaching_vehicle());
        let (_tx, rx) = running();

        let err = pipeline
            .run(&mut source, rx, |_| Err(Error::Config("sink closed".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(pipeline.frames_processed(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = CounterConfig {
            line_offset: 0,
            ..small_scene_config()
        };
        assert!(CountingPipeline::new(config).is_err());
    }
}
