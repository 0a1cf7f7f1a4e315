// THEORY:
// Frame sources are the thin I/O edge of the counter. Decoding video is left to
// external tools; a source only hands over one grayscale `Frame` at a time, in
// stream order, and reports `None` at end-of-stream.
//
// Errors split in two. Failing to open a source is fatal and happens before any
// frame is read. A single bad frame (undecodable file, truncated raw read) is a
// frame error, which the pipeline's malformed-frame policy may skip.

use crate::core_modules::frame::{Frame, PixelLayout};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm", "webp"];

/// A stream of frames in temporal order.
pub trait FrameSource {
    /// The next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}

/// Frames held in memory, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }
}

impl From<Vec<Frame>> for MemorySource {
    fn from(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// A directory of still images, one per frame, visited in file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| Error::SourceOpen {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(Error::NoFrames(dir.to_path_buf()));
        }
        paths.sort();
        debug!("Found {} frame images in {}", paths.len(), dir.display());

        Ok(Self {
            paths: paths.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path).map_err(|source| Error::FrameDecode { path, source })?;
        Ok(Some(Frame::from_dynamic(image)))
    }
}

/// Packed raw frames of a fixed size read back to back from a byte stream,
/// e.g. the output of `ffmpeg -f rawvideo -pix_fmt gray -`.
pub struct RawVideoSource<R> {
    reader: R,
    width: u32,
    height: u32,
    layout: PixelLayout,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R: Read> RawVideoSource<R> {
    pub fn new(reader: R, width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            reader,
            width,
            height,
            layout,
            buffer: vec![0; layout.frame_len(width, height)],
            finished: false,
        }
    }
}

impl RawVideoSource<Box<dyn Read + Send>> {
    /// Opens a file path, or standard input when `path` is `-`.
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let path = path.as_ref();
        let reader: Box<dyn Read + Send> = if path == Path::new("-") {
            Box::new(io::stdin())
        } else {
            let file = File::open(path).map_err(|source| Error::SourceOpen {
                path: path.to_path_buf(),
                source,
            })?;
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(reader, width, height, layout))
    }
}

impl<R: Read> FrameSource for RawVideoSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            self.finished = true;
            return Ok(None);
        }
        if filled < self.buffer.len() {
            self.finished = true;
            return Err(Error::TruncatedFrame {
                read: filled,
                expected: self.buffer.len(),
            });
        }

        Frame::from_raw(self.width, self.height, self.layout, &self.buffer).map(Some)
    }
}
