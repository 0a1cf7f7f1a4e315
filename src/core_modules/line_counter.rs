// THEORY:
// The `LineCrossingCounter` owns the one number the system exists to produce. A
// horizontal line sits at `line_position`; the detection band is the open
// interval `(line_position - offset, line_position + offset)`. Every pending
// observation whose `cy` falls strictly inside the band is counted, removed from
// the set and reported as a `CrossingEvent`.
//
// The pass is a single `retain` over the observation set: each entry is visited
// once, in order, whether or not its neighbours are being removed.

use crate::core_modules::blob::Centroid;
use crate::core_modules::centroid_tracker::ObservationSet;
use serde::Serialize;
use tracing::info;

/// Emitted once per counted centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrossingEvent {
    /// Frame that produced the centroid.
    pub frame_index: u64,
    pub centroid: Centroid,
    /// Count after this crossing was added.
    pub vehicle_count: u64,
}

pub struct LineCrossingCounter {
    line_position: u32,
    offset: u32,
    count: u64,
}

impl LineCrossingCounter {
    pub fn new(line_position: u32, offset: u32) -> Self {
        Self {
            line_position,
            offset,
            count: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn line_position(&self) -> u32 {
        self.line_position
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Whether a vertical coordinate lies strictly inside the detection band.
    pub fn in_band(&self, cy: u32) -> bool {
        let cy = cy as i64;
        let line = self.line_position as i64;
        let offset = self.offset as i64;
        line - offset < cy && cy < line + offset
    }

    /// Counts and retires every in-band observation.
    pub fn evaluate(&mut self, observations: &mut ObservationSet) -> Vec<CrossingEvent> {
        let mut crossings = Vec::new();
        observations.retain(|obs| {
            if !self.in_band(obs.centroid.cy) {
                return true;
            }
            self.count += 1;
            info!("Vehicle detected: {}", self.count);
            crossings.push(CrossingEvent {
                frame_index: obs.frame_index,
                centroid: obs.centroid,
                vehicle_count: self.count,
            });
            false
        });
        crossings
    }
}
