// THEORY:
// The `CentroidTracker` gives the counter its memory. It does not associate blobs
// with one another or estimate velocity; it reduces each accepted blob to its
// centroid and appends that point to an observation set which outlives the frame.
//
// Lifecycle of an observation:
// - **Birth**: appended by `track`, stamped with the index of the frame that saw it.
// - **Counted**: removed by the `LineCrossingCounter` when it falls in the band.
// - **Expired**: removed by `evict_stale` once older than the configured
//   time-to-live, which keeps a long stream from growing the set without bound.
//
// A vehicle whose centroid lands in the band in several consecutive frames is
// counted once per such frame.

use crate::core_modules::blob::{Blob, Centroid};

/// One centroid waiting to be evaluated against the counting line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub centroid: Centroid,
    /// Index of the frame that produced the centroid.
    pub frame_index: u64,
}

/// Centroids not yet counted or expired.
#[derive(Debug, Clone, Default)]
pub struct ObservationSet {
    entries: Vec<Observation>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: Observation) {
        self.entries.push(observation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter()
    }

    /// Keeps the observations for which `keep` returns true. Each entry is
    /// visited exactly once, in insertion order.
    pub fn retain(&mut self, keep: impl FnMut(&Observation) -> bool) {
        self.entries.retain(keep);
    }
}

pub struct CentroidTracker {
    observations: ObservationSet,
    /// Frames an observation may wait before it is dropped.
    ttl_frames: Option<u64>,
}

impl CentroidTracker {
    pub fn new(ttl_frames: Option<u64>) -> Self {
        Self {
            observations: ObservationSet::new(),
            ttl_frames,
        }
    }

    /// Records the centroid of every blob and returns this frame's centroids.
    pub fn track(&mut self, frame_index: u64, blobs: &[Blob]) -> Vec<Centroid> {
        blobs
            .iter()
            .map(|blob| {
                let centroid = blob.centroid();
                self.observations.push(Observation {
                    centroid,
                    frame_index,
                });
                centroid
            })
            .collect()
    }

    /// Drops observations older than the time-to-live. Returns how many were dropped.
    pub fn evict_stale(&mut self, current_frame: u64) -> usize {
        let Some(ttl) = self.ttl_frames else {
            return 0;
        };
        let before = self.observations.len();
        self.observations
            .retain(|obs| current_frame.saturating_sub(obs.frame_index) < ttl);
        before - self.observations.len()
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn observations_mut(&mut self) -> &mut ObservationSet {
        &mut self.observations
    }
}
