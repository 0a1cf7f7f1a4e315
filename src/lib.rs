// THEORY:
// This file is the main entry point for the `vehicle_counter` library crate.
// It defines the public API consumed by the command-line runner and by any
// embedding application.
//
// The high-level interface is `CountingPipeline` (frame-sequential) and
// `ParallelPipeline` (worker pool for the stateless stages), configured by
// `CounterConfig` and fed by a `FrameSource`. The individual stages in
// `core_modules` stay public so they can be tested and reused on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod report;
pub mod source;

#[cfg(test)]
mod test_support;

pub use config::{CounterConfig, MalformedFramePolicy};
pub use error::{Error, Result};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{CountingPipeline, FrameReport, RunSummary, StopReason};
pub use source::{FrameSource, ImageSequenceSource, MemorySource, RawVideoSource};
