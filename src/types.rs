use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{validation_error, Result};

// Supported image formats
pub const IMG_FORMATS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tif", "tiff", "webp"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// Whether the path has one of the supported image extensions (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| get_image_extensions_set().contains(&ext.to_lowercase()))
}

/// Fallback frame rate used when the container does not report one.
pub const DEFAULT_FPS: f64 = 30.0;

/// JPEG quality used for extracted frames.
pub const JPEG_QUALITY: u8 = 95;

/// Column order of the manifest CSV.
pub const MANIFEST_HEADER: &str = "filename,width,height,frame_idx,timestamp_sec";

/// A decodable video file and the stream properties reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSource {
    pub path: PathBuf,
    pub fps: f64,
    /// Zero when the container does not report a frame count.
    pub total_frames: u64,
}

impl VideoSource {
    pub fn new(path: impl Into<PathBuf>, fps: f64, total_frames: u64) -> Self {
        Self {
            path: path.into(),
            fps,
            total_frames,
        }
    }

    /// Duration in seconds, when the frame count is known.
    pub fn duration(&self) -> Option<f64> {
        if self.total_frames > 0 && self.fps > 0.0 {
            Some(self.total_frames as f64 / self.fps)
        } else {
            None
        }
    }
}

/// When to take frames from a video.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPolicy {
    pub interval_seconds: f64,
    pub start_seconds: f64,
    pub end_seconds: Option<f64>,
    /// Hard stop on the number of target timestamps. Required in practice when neither
    /// an end time nor the video duration is known and the decoder never reports
    /// end-of-stream.
    pub max_frames: Option<usize>,
}

impl SamplingPolicy {
    pub fn new(interval_seconds: f64, start_seconds: f64, end_seconds: Option<f64>) -> Result<Self> {
        let policy = Self {
            interval_seconds,
            start_seconds,
            end_seconds,
            max_frames: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.interval_seconds.is_finite() || self.interval_seconds <= 0.0 {
            return Err(validation_error(format!(
                "interval must be a positive number of seconds, got {}",
                self.interval_seconds
            )));
        }
        if !self.start_seconds.is_finite() || self.start_seconds < 0.0 {
            return Err(validation_error(format!(
                "start must be >= 0 seconds, got {}",
                self.start_seconds
            )));
        }
        if let Some(end) = self.end_seconds {
            if end.is_nan() || end < self.start_seconds {
                return Err(validation_error(format!(
                    "end ({}) must be >= start ({})",
                    end, self.start_seconds
                )));
            }
        }
        if self.max_frames == Some(0) {
            return Err(validation_error("max frames must be at least 1"));
        }
        Ok(())
    }
}

/// One extracted frame as recorded in the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
    pub timestamp_seconds: f64,
}

impl FrameSample {
    /// Build the record for a decoded frame. The timestamp is the resolved time of
    /// `frame_index`, not the requested target time.
    pub fn new(frame_index: u64, fps: f64, width: u32, height: u32) -> Self {
        Self {
            filename: frame_filename(frame_index),
            width,
            height,
            frame_index,
            timestamp_seconds: round_millis(frame_index as f64 / fps),
        }
    }
}

/// Zero-padded so that lexical order equals temporal order.
pub fn frame_filename(frame_index: u64) -> String {
    format!("frame_{:08}.jpg", frame_index)
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Ordered record of the frames extracted in one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    samples: Vec<FrameSample>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: FrameSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[FrameSample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.samples.iter().map(|s| s.frame_index).collect()
    }

    /// Restore frame order when samples were produced out of order.
    pub fn sort_by_frame_index(&mut self) {
        self.samples.sort_by_key(|s| s.frame_index);
    }
}

impl From<Vec<FrameSample>> for Manifest {
    fn from(samples: Vec<FrameSample>) -> Self {
        Self { samples }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a FrameSample;
    type IntoIter = std::slice::Iter<'a, FrameSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// A pixel-space box tagged with the convention its coordinates use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingBox {
    /// Upper-left corner plus size.
    Corner { x: f64, y: f64, w: f64, h: f64 },
    /// Center point plus size.
    Center { cx: f64, cy: f64, w: f64, h: f64 },
}

impl BoundingBox {
    /// The box as (x, y, w, h) relative to the image's upper-left corner.
    pub fn to_corner(self) -> (f64, f64, f64, f64) {
        match self {
            BoundingBox::Corner { x, y, w, h } => (x, y, w, h),
            BoundingBox::Center { cx, cy, w, h } => (cx - w / 2.0, cy - h / 2.0, w, h),
        }
    }
}

/// One detector output for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Class id in the detector's own taxonomy.
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// One line of a YOLO label file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRecord {
    pub class_id: u32,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl LabelRecord {
    pub fn to_line(&self) -> String {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            self.class_id, self.center_x, self.center_y, self.width, self.height
        )
    }
}

/// Label records for one frame, in detector emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelFile {
    pub records: Vec<LabelRecord>,
}

impl LabelFile {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// File contents; an empty string when nothing was kept.
    pub fn to_yolo_string(&self) -> String {
        let mut yolo_data = String::with_capacity(self.records.len() * 48);
        for record in &self.records {
            yolo_data.push_str(&record.to_line());
        }
        yolo_data
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    pub output_id: u32,
    pub name: String,
}

/// Translates detector class ids into dataset class ids. Detector classes that are not
/// keys of the map are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    entries: BTreeMap<u32, ClassEntry>,
}

impl ClassMap {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Output ids are assigned in list order, starting at 0.
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut class_map = Self::new();
        for (output_id, (source_id, name)) in labels.into_iter().enumerate() {
            class_map.insert(source_id, output_id as u32, name)?;
        }
        Ok(class_map)
    }

    pub fn insert(&mut self, source_id: u32, output_id: u32, name: impl Into<String>) -> Result<()> {
        if self.entries.contains_key(&source_id) {
            return Err(validation_error(format!(
                "source class {} is mapped more than once",
                source_id
            )));
        }
        if self.entries.values().any(|e| e.output_id == output_id) {
            return Err(validation_error(format!(
                "output class {} is used more than once",
                output_id
            )));
        }
        self.entries.insert(
            source_id,
            ClassEntry {
                output_id,
                name: name.into(),
            },
        );
        Ok(())
    }

    pub fn output_id(&self, source_id: u32) -> Option<u32> {
        self.entries.get(&source_id).map(|e| e.output_id)
    }

    /// (output id, name) pairs sorted by output id.
    pub fn names(&self) -> Vec<(u32, &str)> {
        let mut names: Vec<_> = self
            .entries
            .values()
            .map(|e| (e.output_id, e.name.as_str()))
            .collect();
        names.sort_by_key(|&(id, _)| id);
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ClassMap {
    /// COCO car, bus and truck.
    fn default() -> Self {
        let mut class_map = Self::new();
        for (output_id, (source_id, name)) in [(2, "car"), (5, "bus"), (7, "truck")].into_iter().enumerate() {
            class_map
                .entries
                .insert(source_id, ClassEntry { output_id: output_id as u32, name: name.to_string() });
        }
        class_map
    }
}

// Struct to hold the paths to the output directories for the train/val split
pub struct OutputDirs {
    pub train_images_dir: PathBuf,
    pub train_labels_dir: PathBuf,
    pub val_images_dir: PathBuf,
    pub val_labels_dir: PathBuf,
}

// Struct to hold the split image sets for training and validation
#[derive(Debug, Clone, Default)]
pub struct SplitData {
    pub train_images: Vec<PathBuf>,
    pub val_images: Vec<PathBuf>,
}

// Counters for one sampling run
#[derive(Debug, Default, Clone)]
pub struct SamplingStats {
    pub target_timestamps: usize,
    pub saved_frames: usize,
    pub skipped_frames: usize,
    pub retried_reads: usize,
}

impl SamplingStats {
    pub fn print_summary(&self) {
        log::info!("=== Sampling Summary ===");
        log::info!("Target timestamps: {}", self.target_timestamps);
        log::info!("Frames saved: {}", self.saved_frames);
        log::info!("Reads recovered by retry: {}", self.retried_reads);
        if self.skipped_frames > 0 {
            log::warn!("Skipped (unreadable frame): {}", self.skipped_frames);
        }
    }
}

// Counters for one labeling run
#[derive(Debug, Default, Clone)]
pub struct LabelingStats {
    pub frames_processed: usize,
    pub label_files_written: usize,
    pub empty_label_files: usize,
    pub detections_kept: usize,
    pub detections_dropped: usize,
    pub skipped_no_detections: usize,
    pub failed_frames: usize,
}

impl LabelingStats {
    pub fn merge(mut self, other: LabelingStats) -> Self {
        self.frames_processed += other.frames_processed;
        self.label_files_written += other.label_files_written;
        self.empty_label_files += other.empty_label_files;
        self.detections_kept += other.detections_kept;
        self.detections_dropped += other.detections_dropped;
        self.skipped_no_detections += other.skipped_no_detections;
        self.failed_frames += other.failed_frames;
        self
    }

    pub fn print_summary(&self) {
        log::info!("=== Labeling Summary ===");
        log::info!("Frames processed: {}", self.frames_processed);
        log::info!(
            "Label files written: {} ({} empty)",
            self.label_files_written,
            self.empty_label_files
        );
        log::info!(
            "Detections kept: {}, dropped by class map: {}",
            self.detections_kept,
            self.detections_dropped
        );
        if self.skipped_no_detections > 0 {
            log::warn!(
                "Skipped (no detector output found): {}",
                self.skipped_no_detections
            );
        }
        if self.failed_frames > 0 {
            log::warn!("Failed frames: {}", self.failed_frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_requires_known_frame_count() {
        assert_eq!(VideoSource::new("a.mp4", 30.0, 300).duration(), Some(10.0));
        assert_eq!(VideoSource::new("a.mp4", 30.0, 0).duration(), None);
    }

    #[test]
    fn policy_rejects_bad_bounds() {
        assert!(SamplingPolicy::new(0.0, 0.0, None).is_err());
        assert!(SamplingPolicy::new(-1.0, 0.0, None).is_err());
        assert!(SamplingPolicy::new(f64::NAN, 0.0, None).is_err());
        assert!(SamplingPolicy::new(1.0, 5.0, Some(4.0)).is_err());
        assert!(SamplingPolicy::new(1.0, -0.5, None).is_err());
        assert!(SamplingPolicy::new(1.0, 5.0, Some(5.0)).is_ok());
    }

    #[test]
    fn frame_sample_uses_resolved_time() {
        let sample = FrameSample::new(31, 30.0, 640, 360);
        assert_eq!(sample.filename, "frame_00000031.jpg");
        assert_eq!(sample.timestamp_seconds, 1.033);
    }

    #[test]
    fn center_box_converts_to_corner() {
        let bbox = BoundingBox::Center {
            cx: 120.0,
            cy: 60.0,
            w: 40.0,
            h: 20.0,
        };
        assert_eq!(bbox.to_corner(), (100.0, 50.0, 40.0, 20.0));
    }

    #[test]
    fn class_map_rejects_duplicates() {
        let mut class_map = ClassMap::new();
        class_map.insert(2, 0, "car").unwrap();
        assert!(class_map.insert(2, 1, "auto").is_err());
        assert!(class_map.insert(3, 0, "motorcycle").is_err());
    }

    #[test]
    fn default_class_map_is_coco_vehicles() {
        let class_map = ClassMap::default();
        assert_eq!(class_map.output_id(2), Some(0));
        assert_eq!(class_map.output_id(5), Some(1));
        assert_eq!(class_map.output_id(7), Some(2));
        assert_eq!(class_map.output_id(0), None);
        assert_eq!(class_map.names(), vec![(0, "car"), (1, "bus"), (2, "truck")]);
    }
}
