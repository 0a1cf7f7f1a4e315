// THEORY:
// A single error type for the whole library. Variants fall into two families:
// frame errors, which describe one malformed input frame and can be skipped
// under `MalformedFramePolicy::Skip`, and everything else, which ends a run.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    FrameDimensions {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame buffer holds {actual} bytes, expected {expected} for a {width}x{height} {layout} frame")]
    FrameBufferSize {
        width: u32,
        height: u32,
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("could not decode frame {path}: {source}")]
    FrameDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("raw stream ended mid-frame ({read} of {expected} bytes)")]
    TruncatedFrame { read: usize, expected: usize },

    #[error("could not open frame source {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame source {0} contains no image files")]
    NoFrames(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("pipeline worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl Error {
    /// True for errors confined to a single input frame.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Error::FrameDimensions { .. }
                | Error::FrameBufferSize { .. }
                | Error::FrameDecode { .. }
                | Error::TruncatedFrame { .. }
        )
    }
}
