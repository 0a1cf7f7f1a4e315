// THEORY:
// Machine-readable output of a run, one JSON object per line. Every committed
// frame gets a `frame` record (optionally only frames with a crossing), and the
// run ends with a single `summary` record. The clean mask is never serialized.

use crate::error::Result;
use crate::pipeline::{FrameReport, RunSummary};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Frame(&'a FrameReport),
    Summary(&'a RunSummary),
}

/// Writes JSON-lines records to any byte sink.
pub struct ReportWriter<W: Write> {
    out: W,
    /// Skip frames without a crossing.
    crossings_only: bool,
}

impl ReportWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            crossings_only: false,
        }
    }

    pub fn crossings_only(mut self) -> Self {
        self.crossings_only = true;
        self
    }

    pub fn write_frame(&mut self, report: &FrameReport) -> Result<()> {
        if self.crossings_only && !report.crossing_occurred() {
            return Ok(());
        }
        self.write_record(&Record::Frame(report))
    }

    pub fn write_summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.write_record(&Record::Summary(summary))?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_record(&mut self, record: &Record<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}
