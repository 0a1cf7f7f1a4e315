// Command-line runner for the `vehicle_counter` library.
//
// Decoding video is left to external tools: either point `--frames` at a
// directory of extracted stills, or pipe raw frames into `--raw -`, e.g.
//
//   ffmpeg -i road.mp4 -f rawvideo -pix_fmt gray - \
//     | vehicle_counter --raw - --width 1280 --height 720

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vehicle_counter::core_modules::frame::PixelLayout;
use vehicle_counter::core_modules::image_helper::{mask_path, save_mask};
use vehicle_counter::report::ReportWriter;
use vehicle_counter::{
    CountingPipeline, CounterConfig, FrameReport, FrameSource, ImageSequenceSource,
    MalformedFramePolicy, ParallelPipeline, RawVideoSource,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayoutArg {
    Gray,
    #[value(name = "rgb24")]
    Rgb,
    Rgba,
}

impl From<LayoutArg> for PixelLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Gray => PixelLayout::Gray,
            LayoutArg::Rgb => PixelLayout::Rgb,
            LayoutArg::Rgba => PixelLayout::Rgba,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Skip,
    Abort,
}

impl From<PolicyArg> for MalformedFramePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Skip => MalformedFramePolicy::Skip,
            PolicyArg::Abort => MalformedFramePolicy::Abort,
        }
    }
}

/// Counts vehicles crossing a horizontal line in a video stream.
#[derive(Debug, Parser)]
#[command(name = "vehicle_counter", version, about)]
struct Args {
    /// Directory of frame images, read in file-name order.
    #[arg(long, conflicts_with = "raw", required_unless_present = "raw")]
    frames: Option<PathBuf>,

    /// Raw packed frames from a file, or `-` for stdin.
    #[arg(long, requires_all = ["width", "height"])]
    raw: Option<PathBuf>,

    /// Width of raw frames in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Height of raw frames in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Pixel layout of raw frames.
    #[arg(long, value_enum, default_value_t = LayoutArg::Gray)]
    layout: LayoutArg,

    /// JSON configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    line_position: Option<u32>,

    /// Half-height of the counting band.
    #[arg(long)]
    line_offset: Option<u32>,

    #[arg(long)]
    min_width: Option<u32>,

    #[arg(long)]
    min_height: Option<u32>,

    /// Background model history in frames.
    #[arg(long)]
    history: Option<u32>,

    #[arg(long)]
    var_threshold: Option<f32>,

    /// Treat shadows as foreground.
    #[arg(long)]
    no_shadows: bool,

    /// Morphology kernel size (odd).
    #[arg(long)]
    kernel_size: Option<u32>,

    /// Box blur radius before background subtraction; 0 disables.
    #[arg(long)]
    blur_radius: Option<u32>,

    /// Frames a centroid may wait for the band before it is dropped; 0 keeps it forever.
    #[arg(long)]
    centroid_ttl: Option<u64>,

    /// Pause between frames in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,

    #[arg(long, value_enum)]
    on_malformed: Option<PolicyArg>,

    /// Shape masks and extract blobs on a worker pool.
    #[arg(long)]
    parallel: bool,

    /// Worker count for `--parallel` (default: logical CPUs).
    #[arg(long, requires = "parallel")]
    workers: Option<usize>,

    /// Write frame reports and the run summary as JSON lines.
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Only report frames with a crossing.
    #[arg(long, requires = "report_json")]
    crossings_only: bool,

    /// Write every clean detection mask as a PNG into this directory.
    #[arg(long)]
    dump_masks: Option<PathBuf>,
}

/// Per-frame sinks selected on the command line.
struct Outputs {
    report: Option<ReportWriter<BufWriter<File>>>,
    mask_dir: Option<PathBuf>,
}

impl Outputs {
    fn on_report(&mut self, report: &FrameReport) -> vehicle_counter::Result<()> {
        if let Some(writer) = &mut self.report {
            writer.write_frame(report)?;
        }
        if let Some(dir) = &self.mask_dir {
            save_mask(&mask_path(dir, report.frame_index), &report.clean_mask)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vehicle_counter=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- 1. Configuration ---
    let args = Args::parse();
    let config = build_config(&args)?;
    info!(
        "Counting line at row {} (band +/-{}), minimum blob {}x{}",
        config.line_position, config.line_offset, config.min_blob_width, config.min_blob_height
    );

    // --- 2. Input & Outputs ---
    let mut source = open_source(&args)?;
    let mut outputs = open_outputs(&args)?;

    // --- 3. Cancellation ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current frame");
            let _ = shutdown_tx.send(true);
        }
    });

    // --- 4. Run ---
    let summary = if args.parallel {
        let mut pipeline = ParallelPipeline::new(config)?;
        if let Some(workers) = args.workers {
            pipeline = pipeline.with_workers(workers);
        }
        pipeline
            .run(source, shutdown_rx, |report| outputs.on_report(report))
            .await
            .context("parallel run failed")?
    } else {
        let mut pipeline = CountingPipeline::new(config)?;
        pipeline
            .run(&mut source, shutdown_rx, |report| outputs.on_report(report))
            .await
            .context("run failed")?
    };

    if let Some(writer) = &mut outputs.report {
        writer.write_summary(&summary).context("writing run summary")?;
    }

    println!("{}", summary.vehicle_count);
    Ok(())
}

fn build_config(args: &Args) -> Result<CounterConfig> {
    let mut config = match &args.config {
        Some(path) => CounterConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CounterConfig::default(),
    };

    if let Some(value) = args.line_position {
        config.line_position = value;
    }
    if let Some(value) = args.line_offset {
        config.line_offset = value;
    }
    if let Some(value) = args.min_width {
        config.min_blob_width = value;
    }
    if let Some(value) = args.min_height {
        config.min_blob_height = value;
    }
    if let Some(value) = args.history {
        config.background.history = value;
    }
    if let Some(value) = args.var_threshold {
        config.background.var_threshold = value;
    }
    if args.no_shadows {
        config.background.detect_shadows = false;
    }
    if let Some(value) = args.kernel_size {
        config.mask.kernel_size = value;
    }
    if let Some(value) = args.blur_radius {
        config.preprocess.blur_radius = value;
    }
    if let Some(value) = args.centroid_ttl {
        config.centroid_ttl_frames = (value > 0).then_some(value);
    }
    if let Some(value) = args.delay_ms {
        config.frame_delay_ms = value;
    }
    if let Some(policy) = args.on_malformed {
        config.malformed_frames = policy.into();
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_source(args: &Args) -> Result<Box<dyn FrameSource + Send>> {
    if let Some(dir) = &args.frames {
        let source = ImageSequenceSource::open(dir)
            .with_context(|| format!("opening frame directory {}", dir.display()))?;
        info!("Reading {} frames from {}", source.remaining(), dir.display());
        return Ok(Box::new(source));
    }

    let Some(path) = &args.raw else {
        bail!("either --frames or --raw is required");
    };
    let width = args.width.context("--raw needs --width")?;
    let height = args.height.context("--raw needs --height")?;
    let source = RawVideoSource::open(path, width, height, args.layout.into())
        .with_context(|| format!("opening raw input {}", path.display()))?;
    info!("Reading raw {}x{} frames from {}", width, height, path.display());
    Ok(Box::new(source))
}

fn open_outputs(args: &Args) -> Result<Outputs> {
    let report = match &args.report_json {
        Some(path) => {
            let writer = ReportWriter::create(path)
                .with_context(|| format!("creating report file {}", path.display()))?;
            Some(if args.crossings_only {
                writer.crossings_only()
            } else {
                writer
            })
        }
        None => None,
    };

    if let Some(dir) = &args.dump_masks {
        fs::create_dir_all(dir).with_context(|| format!("creating mask directory {}", dir.display()))?;
    }

    Ok(Outputs {
        report,
        mask_dir: args.dump_masks.clone(),
    })
}
