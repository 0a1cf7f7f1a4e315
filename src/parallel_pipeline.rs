// THEORY:
// The parallel pipeline produces exactly the same reports as `CountingPipeline`
// but spreads the stateless middle of the work across a worker pool.
//
// Background modelling and counting both carry state from one frame to the
// next, so each of them runs on a single task in strict frame order:
//
//   source -> [detection, blocking task] -> channel
//          -> [mask cleanup + blob extraction, N blocking workers]
//          -> ordered buffer -> [counting, caller's task] -> on_report
//
// `StreamExt::buffered` keeps at most N shaping jobs in flight and yields their
// results in submission order, so the counting stage always sees frame k before
// frame k + 1 no matter which worker finished first.

use crate::config::CounterConfig;
use crate::error::Result;
use crate::pipeline::{
    CountingStage, DetectedFrame, DetectionStage, FrameReport, RunSummary, ShapeStage, StopReason,
    absorb_frame_error, log_summary, pause,
};
use crate::source::FrameSource;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

struct DetectionOutcome {
    skipped: u64,
    stop_reason: StopReason,
}

pub struct ParallelPipeline {
    config: CounterConfig,
    workers: usize,
}

impl ParallelPipeline {
    /// Creates a pipeline with one shaping worker per logical CPU.
    pub fn new(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            workers: num_cpus::get().max(1),
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Drains `source` and returns the run summary. Frames already handed to
    /// the workers when cancellation is observed are discarded uncounted.
    pub async fn run<S, F>(
        self,
        mut source: S,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    ) -> Result<RunSummary>
    where
        S: FrameSource + Send + 'static,
        F: FnMut(&FrameReport) -> Result<()>,
    {
        info!("Starting parallel pipeline with {} shaping workers", self.workers);
        let (detected_tx, detected_rx) = mpsc::channel::<DetectedFrame>(self.workers * 2);

        // --- 1. Detection (sequential) ---
        let detection_config = self.config.clone();
        let detection_shutdown = shutdown.clone();
        let detection = tokio::task::spawn_blocking(move || -> Result<DetectionOutcome> {
            let policy = detection_config.malformed_frames;
            let mut stage = DetectionStage::new(&detection_config);
            let mut skipped = 0;

            let stop_reason = loop {
                if *detection_shutdown.borrow() {
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
                match stage.detect(&frame) {
                    Ok(detected) => {
                        if detected_tx.blocking_send(detected).is_err() {
                            // Counting side has gone away.
                            break StopReason::Cancelled;
                        }
                    }
                    Err(err) => absorb_frame_error(policy, err, &mut skipped)?,
                }
            };

            debug!("Detection finished after {} frames", stage.frames_detected());
            Ok(DetectionOutcome { skipped, stop_reason })
        });

        // --- 2. Shaping (parallel, order preserving) ---
        let shaping = ShapeStage::new(&self.config);
        let mut shaped = Box::pin(
            stream::unfold(detected_rx, |mut rx| async move {
                rx.recv().await.map(|detected| (detected, rx))
            })
            .map(move |detected| {
                let shaping = shaping.clone();
                tokio::task::spawn_blocking(move || shaping.shape(detected))
            })
            .buffered(self.workers),
        );

        // --- 3. Counting (sequential) ---
        let delay = Duration::from_millis(self.config.frame_delay_ms);
        let mut counting = CountingStage::new(&self.config);
        let mut committed = 0;
        let mut cancelled = false;

        while let Some(joined) = shaped.next().await {
            if *shutdown.borrow() {
                cancelled = true;
                break;
            }
            let report = counting.commit(joined?);
            committed += 1;
            on_report(&report)?;

            if !delay.is_zero() {
                pause(delay, &mut shutdown).await;
            }
        }
        // Closing the channel releases a detection task blocked on a full buffer.
        drop(shaped);

        let outcome = detection.await??;
        let stop_reason = if cancelled {
            StopReason::Cancelled
        } else {
            outcome.stop_reason
        };

        let summary = RunSummary {
            frames_processed: committed,
            frames_skipped: outcome.skipped,
            vehicle_count: counting.vehicle_count(),
            stop_reason,
        };
        log_summary(&summary);
        Ok(summary)
    }
}
