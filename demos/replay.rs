//! Replays a recorded detections file through the violation pipeline.
//!
//! ```text
//! cargo run --example replay -- detections.txt --export violations.json
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use image::RgbImage;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::info;

use roadwatch::{Config, Pipeline, ReplayDetector, StopHandle};

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Run recorded detections through tracking and violation rules")]
struct Args {
    /// File of `<timestamp_us>:<json>` lines
    detections: PathBuf,

    /// TOML config (defaults to $ROADWATCH_CONFIG, then ./roadwatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `[rules] overspeed_threshold_kmh`
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Write the evidence log as JSON
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write annotated evidence images under this directory
    #[arg(long)]
    evidence_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    if let Some(threshold) = args.threshold {
        config.rules.overspeed_threshold_kmh = threshold;
    }
    if let Some(dir) = &args.evidence_dir {
        config.evidence.enabled = true;
        config.evidence.images_dir = dir.join("images");
        config.evidence.clips_dir = dir.join("clips");
    }
    let canvas = config.evidence.enabled;

    let file = File::open(&args.detections)
        .with_context(|| format!("opening {}", args.detections.display()))?;
    let (width, height) = (args.width, args.height);
    // recorded detections carry no pixels; annotate a blank canvas instead
    let mut source = ReplayDetector::new(BufReader::new(file), Utc::now(), (width, height)).map(
        move |frame| match frame {
            Ok(frame) if canvas => Ok(frame.with_image(RgbImage::new(width, height))),
            other => other,
        },
    );

    let mut pipeline = Pipeline::new(&config)?;
    let stop = StopHandle::new();
    let stopper = stop.clone();
    let max_frames = args.max_frames;

    let processed = pipeline.run(&mut source, &stop, |report| {
        for event in &report.events {
            println!(
                "frame {:>6}  {:<18} actor {:<4} {}",
                report.frame_index,
                event.kind().to_string(),
                event.actor_id(),
                event.artifact_name()
            );
        }

        if max_frames.map_or(false, |max| report.frame_index + 1 >= max) {
            stopper.stop();
        }
    });
    info!(processed, "replay finished");

    if let Some(path) = &args.export {
        pipeline.evidence_log().export_json(path)?;
        info!(
            path = %path.display(),
            records = pipeline.evidence_log().len(),
            "evidence log exported"
        );
    }

    let stats = pipeline.shutdown();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
