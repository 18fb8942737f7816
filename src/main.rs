//! Deception detection command line tool: runs the pipeline on one video and
//! prints the prediction record as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use deception_detection::config::{Config, EXAMPLE_CONFIG};
use deception_detection::models::ModelRegistry;
use deception_detection::pipeline::{Pipeline, PipelineOptions};
use deception_detection::progress::ProgressBoard;
use deception_detection::video::SamplingPolicy;
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file to analyze
    #[arg(short, long, required_unless_present = "print_config")]
    video: Option<PathBuf>,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Sampling policy (uniform_stride, detected_face, leading)
    #[arg(short, long)]
    policy: Option<String>,

    /// Number of frames in the scored sequence
    #[arg(short = 'n', long)]
    target_frames: Option<usize>,

    /// Write the normalized face crops to this directory
    #[arg(long)]
    export_frames: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    if args.print_config {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(policy) = &args.policy {
        config.sampling.policy = policy.parse::<SamplingPolicy>()?;
    }
    if let Some(target_frames) = args.target_frames {
        config.sampling.target_frames = target_frames;
    }
    config.validate()?;

    let video = args.video.context("--video is required")?;
    let models_started = std::time::Instant::now();
    let mut models = ModelRegistry::from_config(&config)?;
    info!("Models ready in {:.2?}", models_started.elapsed());

    let mut options = PipelineOptions::from_config(&config);
    options.export_dir = args.export_frames;

    let board = ProgressBoard::default();
    let progress = board.start_run();
    let outcome = Pipeline::new(&mut models, options).run(&video, &progress);

    if let Some(snapshot) = board.latest() {
        info!("{} finished at {}% ({:?})", snapshot.run, snapshot.percent, snapshot.stage);
    }

    let result = outcome.with_context(|| format!("Analysis of {} failed", video.display()))?;
    println!("{}", result.to_record().to_json()?);
    Ok(())
}
