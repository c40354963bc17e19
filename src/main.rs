use clap::Parser;
use log::{error, info};
use rayon::prelude::*;
use std::fs;

use video2yolo::acquisition::download_video;
use video2yolo::config::{Cli, Command, ExtractArgs, FetchArgs, LabelArgs, SplitArgs};
use video2yolo::conversion::{label_frames, FrameInput};
use video2yolo::dataset::process_split;
use video2yolo::detector::JsonDetections;
use video2yolo::error::{Result, Video2YoloError};
use video2yolo::manifest::{manifest_to_csv, read_manifest, write_manifest};
use video2yolo::sampler::sample_video;
use video2yolo::utils::collect_images;

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Fetch(args) => run_fetch(&args),
        Command::Extract(args) => run_extract(&args),
        Command::Label(args) => run_label(&args),
        Command::Split(args) => run_split(&args),
    }
}

fn run_fetch(args: &FetchArgs) -> Result<()> {
    let video_path = download_video(&args.url, &args.workdir)?;
    info!("Downloaded video: {}", video_path.display());
    Ok(())
}

fn run_extract(args: &ExtractArgs) -> Result<()> {
    // Validate before any download or decoding work.
    let policy = args.sampling_policy()?;
    fs::create_dir_all(&args.workdir)?;

    let video_path = match (&args.video, &args.url) {
        (Some(video), _) => video.clone(),
        (None, Some(url)) => download_video(url, &args.workdir)?,
        (None, None) => {
            return Err(Video2YoloError::Validation(
                "either --video or --url is required".to_string(),
            ))
        }
    };

    let frames_dir = args.frames_dir();
    let (manifest, stats) = sample_video(&video_path, &policy, &frames_dir)?;
    stats.print_summary();

    let manifest_path = args.manifest_path();
    write_manifest(&manifest_path, &manifest)?;

    info!("Saved {} frames to: {}", manifest.len(), frames_dir.display());
    info!("Manifest CSV: {}", manifest_path.display());
    if !manifest.is_empty() {
        info!("Sample rows:");
        for line in manifest_to_csv(&manifest).lines().take(6) {
            info!("  {}", line);
        }
    }
    Ok(())
}

fn run_label(args: &LabelArgs) -> Result<()> {
    let frames = match &args.manifest {
        Some(manifest_path) => {
            let manifest = read_manifest(manifest_path)?;
            info!(
                "Read {} frames from manifest {}",
                manifest.len(),
                manifest_path.display()
            );
            FrameInput::from_manifest(&manifest, &args.frames_dir)
        }
        None => {
            let images = collect_images(&args.frames_dir)?;
            info!(
                "Found {} images in {}",
                images.len(),
                args.frames_dir.display()
            );
            images
                .par_iter()
                .map(|image_path| FrameInput::from_image(image_path))
                .collect::<Result<Vec<_>>>()?
        }
    };

    let labels_dir = args.labels_dir();
    let detector = JsonDetections::new(&args.detections_dir);
    label_frames(
        &frames,
        &detector,
        args.confidence,
        &args.classes,
        &labels_dir,
    )?;

    info!("Labels saved in: {}", labels_dir.display());
    Ok(())
}

fn run_split(args: &SplitArgs) -> Result<()> {
    process_split(
        &args.images_dir,
        args.labels_dir.as_deref(),
        &args.output_dir,
        args.train_ratio,
        args.seed,
        &args.classes,
    )?;
    Ok(())
}
