//! Multicam binary: synchronized capture, reset and register upload from the
//! command line.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::ImageFormat;
use tracing::{error, info, warn};

use multicam_capture::{
    logging, BatchOptions, BatchOrchestrator, BatchResult, CameraId, CameraOutcome, CaptureConfig,
    CapturedFrame, Mode, SerialOpener,
};

#[derive(Parser)]
#[command(name = "multicam", version, about = "Control serial camera modules")]
struct Args {
    /// Camera to address; all configured cameras when omitted
    camera_id: Option<CameraId>,

    /// Reset instead of capturing
    #[arg(long)]
    reset: bool,

    /// Upload the sensor register table, then reset
    #[arg(short = 'I', long)]
    init_regs: bool,

    /// Exposure scale; implies a register upload
    #[arg(long, value_parser = clap::value_parser!(i32).range(1..=10))]
    exposure: Option<i32>,

    /// Save captures as single-channel luma
    #[arg(long)]
    grayscale: bool,

    /// Capture one color frame without reset and overwrite live/live.png
    #[arg(long)]
    live: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for saved images
    #[arg(long, default_value = "images")]
    output_dir: PathBuf,
}

/// Writes decoded frames as PNG files.
struct FrameSink {
    root: PathBuf,
    first_saved: bool,
}

impl FrameSink {
    const fn new(root: PathBuf) -> Self {
        Self {
            root,
            first_saved: false,
        }
    }

    fn path_for(&self, frame: &CapturedFrame) -> PathBuf {
        let meta = &frame.metadata;
        if meta.live {
            self.root.join("live").join("live.png")
        } else if meta.batch_id.is_some() {
            self.root
                .join("raws")
                .join(format!("{}_{}.png", meta.captured_at.timestamp(), meta.camera))
        } else {
            self.root.join(format!("cam_{}_capture.png", meta.camera))
        }
    }

    fn save(&mut self, frame: CapturedFrame) -> Result<PathBuf> {
        let path = self.path_for(&frame);
        let CapturedFrame { image, metadata } = frame;
        let image = image.into_dynamic_image()?;
        save_png(&image, &path).with_context(|| format!("cannot write {}", path.display()))?;

        if !metadata.live && !self.first_saved {
            self.first_saved = true;
            let identifier = if metadata.batch_id.is_some() {
                metadata.captured_at.timestamp().to_string()
            } else {
                "single".to_owned()
            };
            let extra = self.root.join(format!("{identifier}_1.png"));
            if let Err(err) = save_png(&image, &extra) {
                warn!(
                    camera = metadata.camera,
                    "extra first-image save failed: {err:#}"
                );
            }
        }

        info!(camera = metadata.camera, "saved image: {}", path.display());
        Ok(path)
    }
}

fn save_png(image: &image::DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Log every outcome, save frames, and return the number of failed cameras.
fn finish(result: BatchResult, sink: &mut FrameSink) -> usize {
    let mode = result.mode();
    let mut failed = 0;
    for (camera, outcome) in result.into_outcomes() {
        match outcome {
            CameraOutcome::Acknowledged(ack) => info!(camera, "{ack}"),
            CameraOutcome::Captured(frame) => {
                if let Err(err) = sink.save(*frame) {
                    error!(camera, "image save error: {err:#}");
                    failed += 1;
                }
            }
            CameraOutcome::Failed(err) => {
                error!(camera, %mode, "{err}");
                failed += 1;
            }
        }
    }
    failed
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CaptureConfig::from_json_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => CaptureConfig::default(),
    };
    let targets: BTreeSet<CameraId> = match args.camera_id {
        Some(id) => BTreeSet::from([id]),
        None => config.camera_ids().into_iter().collect(),
    };

    let opener = SerialOpener::from_config(&config);
    let orchestrator = BatchOrchestrator::new(config, opener)?;
    let mut sink = FrameSink::new(args.output_dir.clone());

    let failed = if args.init_regs || args.exposure.is_some() {
        info!("register update mode");
        let options = BatchOptions {
            exposure_scale: args.exposure,
            ..BatchOptions::default()
        };
        let result = orchestrator.run_batch(&targets, Mode::Update, &options)?;
        finish(result, &mut sink)
    } else if args.live {
        info!("live mode: capturing single frame without reset");
        let options = BatchOptions {
            live: true,
            ..BatchOptions::default()
        };
        let result = orchestrator.run_batch(&targets, Mode::Capture, &options)?;
        finish(result, &mut sink)
    } else if args.camera_id.is_some() {
        let mode = if args.reset {
            Mode::Reset
        } else {
            Mode::Capture
        };
        let options = BatchOptions {
            grayscale: args.grayscale,
            dump_hex: mode == Mode::Capture,
            ..BatchOptions::default()
        };
        let result = orchestrator.run_batch(&targets, mode, &options)?;
        finish(result, &mut sink)
    } else if args.reset {
        let options = BatchOptions::default();
        let result = orchestrator.run_batch(&targets, Mode::Reset, &options)?;
        finish(result, &mut sink)
    } else {
        info!("all camera mode: reset, stabilize, capture");
        let options = BatchOptions {
            grayscale: args.grayscale,
            ..BatchOptions::default()
        };
        let shot = orchestrator.run_shot(&targets, &options)?;
        finish(shot.reset, &mut sink) + finish(shot.capture, &mut sink)
    };

    if failed > 0 {
        bail!("{failed} camera operation(s) failed");
    }
    Ok(())
}
