use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Result;
use crate::types::{ClassMap, SamplingPolicy};

/// Build a YOLO dataset from video: sample frames, convert detector output into labels,
/// and split the result into train/val sets.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download a video with yt-dlp
    Fetch(FetchArgs),
    /// Extract frames at a fixed interval and write a manifest CSV
    Extract(ExtractArgs),
    /// Convert per-frame detector output into YOLO label files
    Label(LabelArgs),
    /// Copy images (and labels) into train/val directories
    Split(SplitArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Video URL
    #[arg(long)]
    pub url: String,

    /// Directory the video is downloaded into
    #[arg(long, default_value = "dataset_source")]
    pub workdir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Local video file
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    pub video: Option<PathBuf>,

    /// Video URL to download first
    #[arg(long)]
    pub url: Option<String>,

    /// Working directory (downloaded video and frames go here)
    #[arg(long, default_value = "dataset_source")]
    pub workdir: PathBuf,

    /// Extract one frame every N seconds
    #[arg(long = "every-sec", default_value_t = 1.0, value_parser = validate_interval)]
    pub every_sec: f64,

    /// Start time in seconds; negative values are treated as 0
    #[arg(long = "start-sec", default_value_t = 0.0, allow_negative_numbers = true)]
    pub start_sec: f64,

    /// End time in seconds (default: full video)
    #[arg(long = "end-sec")]
    pub end_sec: Option<f64>,

    /// Stop after this many target timestamps
    #[arg(long = "max-frames")]
    pub max_frames: Option<usize>,

    /// Subfolder of the workdir for extracted frames
    #[arg(long = "frames-subdir", default_value = "frames")]
    pub frames_subdir: String,

    /// Manifest CSV filename inside the workdir
    #[arg(long = "manifest-name", default_value = "frames_manifest.csv")]
    pub manifest_name: String,
}

impl ExtractArgs {
    pub fn sampling_policy(&self) -> Result<SamplingPolicy> {
        Ok(SamplingPolicy::new(self.every_sec, self.start_sec.max(0.0), self.end_sec)?
            .with_max_frames(self.max_frames))
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.workdir.join(&self.frames_subdir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.workdir.join(&self.manifest_name)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LabelArgs {
    /// Directory of extracted frames
    #[arg(long = "frames-dir")]
    pub frames_dir: PathBuf,

    /// Directory of per-frame detector output (<stem>.json)
    #[arg(long = "detections-dir")]
    pub detections_dir: PathBuf,

    /// Output directory for label files (default: <frames-dir>/../labels)
    #[arg(long = "labels-dir")]
    pub labels_dir: Option<PathBuf>,

    /// Manifest CSV to take frame list and dimensions from
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Minimum detection confidence
    #[arg(long = "conf", default_value_t = 0.25, value_parser = validate_confidence)]
    pub confidence: f32,

    /// Detector classes to keep, as SOURCE_ID=NAME in output class order
    #[arg(long, value_parser = parse_class_map, default_value = "2=car,5=bus,7=truck")]
    pub classes: ClassMap,
}

impl LabelArgs {
    pub fn labels_dir(&self) -> PathBuf {
        self.labels_dir.clone().unwrap_or_else(|| {
            self.frames_dir
                .parent()
                .map(|parent| parent.join("labels"))
                .unwrap_or_else(|| PathBuf::from("labels"))
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Directory of images to split
    #[arg(long = "images-dir")]
    pub images_dir: PathBuf,

    /// Directory of label files to copy alongside the images
    #[arg(long = "labels-dir")]
    pub labels_dir: Option<PathBuf>,

    /// Output dataset directory
    #[arg(long = "output-dir", default_value = "dataset")]
    pub output_dir: PathBuf,

    /// Proportion of images used for training
    #[arg(long = "train-ratio", default_value_t = 0.8, value_parser = validate_size)]
    pub train_ratio: f64,

    /// Seed for random shuffling
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// Class names written to dataset.yaml, as SOURCE_ID=NAME
    #[arg(long, value_parser = parse_class_map, default_value = "2=car,5=bus,7=truck")]
    pub classes: ClassMap,
}

// Validate that the size is between 0.0 and 1.0
pub fn validate_size(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}

// Validate that the confidence threshold is between 0.0 and 1.0
pub fn validate_confidence(s: &str) -> std::result::Result<f32, String> {
    match f32::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("CONF must be between 0.0 and 1.0".to_string()),
    }
}

// Validate that the sampling interval is a positive number of seconds
pub fn validate_interval(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if val.is_finite() && val > 0.0 => Ok(val),
        _ => Err("interval must be a positive number of seconds".to_string()),
    }
}

/// Parse `2=car,5=bus,7=truck`. Output ids follow list order.
pub fn parse_class_map(s: &str) -> std::result::Result<ClassMap, String> {
    let mut labels = Vec::new();
    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (source_id, name) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected SOURCE_ID=NAME, got '{}'", entry))?;
        let source_id = source_id
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid source class id in '{}'", entry))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("missing class name in '{}'", entry));
        }
        labels.push((source_id, name.to_string()));
    }
    if labels.is_empty() {
        return Err("class map must list at least one class".to_string());
    }
    ClassMap::from_labels(labels).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_size() {
        assert!(validate_size("0.5").is_ok());
        assert!(validate_size("1.0").is_ok());
        assert!(validate_size("0.0").is_ok());
        assert!(validate_size("-0.1").is_err());
        assert!(validate_size("1.1").is_err());
        assert!(validate_size("abc").is_err());
    }

    #[test]
    fn test_validate_interval() {
        assert_eq!(validate_interval("2"), Ok(2.0));
        assert!(validate_interval("0").is_err());
        assert!(validate_interval("-1").is_err());
        assert!(validate_interval("inf").is_err());
    }

    #[test]
    fn test_parse_class_map() {
        let class_map = parse_class_map("2=car, 5=bus,7=truck").unwrap();
        assert_eq!(class_map, ClassMap::default());

        assert!(parse_class_map("").is_err());
        assert!(parse_class_map("car").is_err());
        assert!(parse_class_map("x=car").is_err());
        assert!(parse_class_map("2=").is_err());
        assert!(parse_class_map("2=car,2=auto").is_err());
    }

    #[test]
    fn test_extract_args_clamp_negative_start() {
        let cli = Cli::try_parse_from([
            "video2yolo",
            "extract",
            "--video",
            "clip.mp4",
            "--start-sec",
            "-3",
            "--every-sec",
            "2",
        ])
        .unwrap();
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        let policy = args.sampling_policy().unwrap();
        assert_eq!(policy.start_seconds, 0.0);
        assert_eq!(policy.interval_seconds, 2.0);
        assert_eq!(args.manifest_path(), PathBuf::from("dataset_source/frames_manifest.csv"));
    }

    #[test]
    fn test_extract_requires_a_source() {
        assert!(Cli::try_parse_from(["video2yolo", "extract"]).is_err());
        assert!(Cli::try_parse_from([
            "video2yolo",
            "extract",
            "--video",
            "a.mp4",
            "--url",
            "https://example.com/v"
        ])
        .is_err());
    }

    #[test]
    fn test_label_args_default_labels_dir() {
        let cli = Cli::try_parse_from([
            "video2yolo",
            "label",
            "--frames-dir",
            "work/frames",
            "--detections-dir",
            "work/detections",
        ])
        .unwrap();
        let Command::Label(args) = cli.command else {
            panic!("expected label");
        };
        assert_eq!(args.labels_dir(), PathBuf::from("work/labels"));
        assert_eq!(args.confidence, 0.25);
        assert_eq!(args.classes.len(), 3);
    }
}
