use indicatif::ProgressBar;
use log::{debug, error, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detector::Detector;
use crate::error::{validation_error, Result, Video2YoloError};
use crate::types::{BoundingBox, ClassMap, Detection, LabelFile, LabelRecord, LabelingStats, Manifest};
use crate::utils::{create_progress_bar, file_stem_of, write_atomically};

/// An image to label together with its pixel dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInput {
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl FrameInput {
    /// Frames listed in a manifest, located under `frames_dir`.
    pub fn from_manifest(manifest: &Manifest, frames_dir: &Path) -> Vec<FrameInput> {
        manifest
            .iter()
            .map(|sample| FrameInput {
                image_path: frames_dir.join(&sample.filename),
                width: sample.width,
                height: sample.height,
            })
            .collect()
    }

    /// Read dimensions from the image header.
    pub fn from_image(image_path: &Path) -> Result<FrameInput> {
        let (width, height) = image::image_dimensions(image_path)?;
        Ok(FrameInput {
            image_path: image_path.to_path_buf(),
            width,
            height,
        })
    }
}

/// Normalize a pixel-space box to YOLO (center_x, center_y, width, height).
///
/// Center-origin boxes are moved to corner origin first, so every caller goes through
/// the same arithmetic regardless of what its detector emits.
pub fn normalize_bbox(bbox: BoundingBox, image_width: u32, image_height: u32) -> Result<(f64, f64, f64, f64)> {
    if image_width == 0 || image_height == 0 {
        return Err(validation_error(format!(
            "image dimensions must be positive, got {}x{}",
            image_width, image_height
        )));
    }
    let (x, y, w, h) = bbox.to_corner();
    let image_width = image_width as f64;
    let image_height = image_height as f64;
    Ok((
        (x + w / 2.0) / image_width,
        (y + h / 2.0) / image_height,
        w / image_width,
        h / image_height,
    ))
}

/// Convert one frame's detections into label records.
///
/// Detections whose class is not in `class_map` are dropped. Order follows `detections`.
pub fn convert(
    detections: &[Detection],
    image_width: u32,
    image_height: u32,
    class_map: &ClassMap,
) -> Result<LabelFile> {
    if image_width == 0 || image_height == 0 {
        return Err(validation_error(format!(
            "image dimensions must be positive, got {}x{}",
            image_width, image_height
        )));
    }

    let mut records = Vec::with_capacity(detections.len());
    for detection in detections {
        let class_id = match class_map.output_id(detection.class_id) {
            Some(class_id) => class_id,
            None => continue,
        };
        let (center_x, center_y, width, height) =
            normalize_bbox(detection.bbox, image_width, image_height)?;
        records.push(LabelRecord {
            class_id,
            center_x,
            center_y,
            width,
            height,
        });
    }

    Ok(LabelFile { records })
}

/// Write `<labels_dir>/<stem>.txt`. A frame with no kept detections still gets an
/// (empty) file.
pub fn write_label_file(labels_dir: &Path, stem: &str, label_file: &LabelFile) -> Result<PathBuf> {
    let label_output_path = labels_dir.join(format!("{}.txt", stem));
    write_atomically(&label_output_path, label_file.to_yolo_string().as_bytes())?;
    Ok(label_output_path)
}

/// Run the detector on one frame and write its label file.
pub fn process_frame<D: Detector + ?Sized>(
    frame: &FrameInput,
    detector: &D,
    confidence: f32,
    class_map: &ClassMap,
    labels_dir: &Path,
) -> Result<LabelingStats> {
    let mut stats = LabelingStats {
        frames_processed: 1,
        ..Default::default()
    };

    let stem = file_stem_of(&frame.image_path).ok_or_else(|| {
        validation_error(format!(
            "image path has no file stem: {}",
            frame.image_path.display()
        ))
    })?;

    let detections = match detector.detect(&frame.image_path, confidence) {
        Ok(detections) => detections,
        Err(Video2YoloError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "No detector output found for {}",
                frame.image_path.display()
            );
            stats.skipped_no_detections = 1;
            return Ok(stats);
        }
        Err(e) => return Err(e),
    };

    let label_file = convert(&detections, frame.width, frame.height, class_map)?;
    stats.detections_kept = label_file.len();
    stats.detections_dropped = detections.len() - label_file.len();

    let label_path = write_label_file(labels_dir, &stem, &label_file)?;
    debug!(
        "Wrote {} labels to {}",
        label_file.len(),
        label_path.display()
    );
    stats.label_files_written = 1;
    if label_file.is_empty() {
        stats.empty_label_files = 1;
    }
    Ok(stats)
}

/// Label a batch of frames in parallel. Each frame is independent, so a failure is
/// logged and counted without affecting the others.
pub fn process_frames_in_parallel<D: Detector + ?Sized>(
    frames: &[FrameInput],
    detector: &D,
    confidence: f32,
    class_map: &ClassMap,
    labels_dir: &Path,
    pb: &ProgressBar,
) -> LabelingStats {
    frames
        .par_iter()
        .map(|frame| {
            let stats = match process_frame(frame, detector, confidence, class_map, labels_dir) {
                Ok(stats) => stats,
                Err(e) => {
                    error!("Failed to label {}: {}", frame.image_path.display(), e);
                    LabelingStats {
                        frames_processed: 1,
                        failed_frames: 1,
                        ..Default::default()
                    }
                }
            };
            pb.inc(1);
            stats
        })
        .reduce(LabelingStats::default, LabelingStats::merge)
}

/// Label all frames into `labels_dir`. Frames without detector output are skipped;
/// any other per-frame failure fails the run once every frame has been attempted.
pub fn label_frames<D: Detector + ?Sized>(
    frames: &[FrameInput],
    detector: &D,
    confidence: f32,
    class_map: &ClassMap,
    labels_dir: &Path,
) -> Result<LabelingStats> {
    fs::create_dir_all(labels_dir)?;

    let pb = create_progress_bar(frames.len() as u64, "Label");
    let stats = process_frames_in_parallel(frames, detector, confidence, class_map, labels_dir, &pb);
    pb.finish_with_message("Labeling complete");
    stats.print_summary();

    if stats.failed_frames > 0 {
        return Err(Video2YoloError::Labeling {
            failed: stats.failed_frames,
            total: stats.frames_processed,
        });
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_id: u32, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            confidence: 0.9,
            bbox,
        }
    }

    #[test]
    fn test_normalize_corner_box() {
        let bbox = BoundingBox::Corner {
            x: 10.0,
            y: 10.0,
            w: 10.0,
            h: 10.0,
        };
        assert_eq!(normalize_bbox(bbox, 100, 100).unwrap(), (0.15, 0.15, 0.1, 0.1));
    }

    #[test]
    fn test_center_and_corner_agree() {
        let corner = BoundingBox::Corner {
            x: 100.0,
            y: 50.0,
            w: 40.0,
            h: 20.0,
        };
        let center = BoundingBox::Center {
            cx: 120.0,
            cy: 60.0,
            w: 40.0,
            h: 20.0,
        };
        assert_eq!(
            normalize_bbox(corner, 1920, 1080).unwrap(),
            normalize_bbox(center, 1920, 1080).unwrap()
        );
    }

    #[test]
    fn test_convert_rejects_zero_dimensions() {
        let err = convert(&[], 0, 1080, &ClassMap::default()).unwrap_err();
        assert!(matches!(err, Video2YoloError::Validation(_)));
        assert!(convert(&[], 1920, 0, &ClassMap::default()).is_err());
    }

    #[test]
    fn test_convert_drops_unmapped_and_keeps_order() {
        let detections = vec![
            detection(7, BoundingBox::Corner { x: 0.0, y: 0.0, w: 50.0, h: 50.0 }),
            detection(0, BoundingBox::Corner { x: 10.0, y: 10.0, w: 5.0, h: 5.0 }),
            detection(2, BoundingBox::Center { cx: 50.0, cy: 50.0, w: 20.0, h: 10.0 }),
        ];
        let label_file = convert(&detections, 100, 100, &ClassMap::default()).unwrap();
        assert_eq!(
            label_file.to_yolo_string(),
            "2 0.250000 0.250000 0.500000 0.500000\n0 0.500000 0.500000 0.200000 0.100000\n"
        );
    }

    #[test]
    fn test_label_file_keeps_dotted_stem() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = write_label_file(temp_dir.path(), "clip.part1", &LabelFile::default()).unwrap();
        let second = write_label_file(temp_dir.path(), "clip.part2", &LabelFile::default()).unwrap();
        assert_eq!(first, temp_dir.path().join("clip.part1.txt"));
        assert_eq!(second, temp_dir.path().join("clip.part2.txt"));
    }

    #[test]
    fn test_write_empty_label_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_label_file(temp_dir.path(), "frame_00000000", &LabelFile::default()).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "");
    }
}
