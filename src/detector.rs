//! Detector seam.
//!
//! The object detector is an external collaborator. Whatever produces detections must
//! say which box convention it emits; nothing here tries to guess.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{BoundingBox, Detection};
use crate::utils::{file_stem_of, read_and_parse_json};

/// Source of detections for an image.
pub trait Detector: Sync {
    /// Detections for `image_path` with confidence at or above `confidence`, in the
    /// order the detector emitted them. A missing result is reported as an IO error of
    /// kind `NotFound`.
    fn detect(&self, image_path: &Path, confidence: f32) -> Result<Vec<Detection>>;
}

/// Box convention declared by a detector's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxFormat {
    /// `[x, y, w, h]` from the upper-left corner.
    Corner,
    /// `[cx, cy, w, h]` from the box center.
    Center,
}

impl BoxFormat {
    pub fn make_box(self, [a, b, w, h]: [f64; 4]) -> BoundingBox {
        match self {
            BoxFormat::Corner => BoundingBox::Corner { x: a, y: b, w, h },
            BoxFormat::Center => BoundingBox::Center { cx: a, cy: b, w, h },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: [f64; 4],
}

/// Per-image detector output as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionsDocument {
    pub box_format: BoxFormat,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

impl DetectionsDocument {
    pub fn into_detections(self, confidence: f32) -> Vec<Detection> {
        let box_format = self.box_format;
        self.detections
            .into_iter()
            .filter(|d| d.confidence >= confidence)
            .map(|d| Detection {
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: box_format.make_box(d.bbox),
            })
            .collect()
    }
}

/// Reads `<stem>.json` files written by an external detector run.
#[derive(Debug, Clone)]
pub struct JsonDetections {
    dir: PathBuf,
}

impl JsonDetections {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, image_path: &Path) -> Option<PathBuf> {
        file_stem_of(image_path).map(|stem| self.dir.join(format!("{}.json", stem)))
    }
}

impl Detector for JsonDetections {
    fn detect(&self, image_path: &Path, confidence: f32) -> Result<Vec<Detection>> {
        let json_path = self.path_for(image_path).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no file stem in {}", image_path.display()),
            )
        })?;
        let document: DetectionsDocument = read_and_parse_json(&json_path)?;
        Ok(document.into_detections(confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Video2YoloError;
    use std::fs;

    #[test]
    fn test_document_declares_box_format() {
        let document: DetectionsDocument = serde_json::from_str(
            r#"{"box_format": "center", "detections": [
                {"class_id": 2, "confidence": 0.9, "bbox": [120.0, 60.0, 40.0, 20.0]},
                {"class_id": 7, "confidence": 0.1, "bbox": [10.0, 10.0, 4.0, 4.0]}
            ]}"#,
        )
        .unwrap();
        let detections = document.into_detections(0.25);
        assert_eq!(detections.len(), 1);
        assert_eq!(
            detections[0].bbox,
            BoundingBox::Center {
                cx: 120.0,
                cy: 60.0,
                w: 40.0,
                h: 20.0
            }
        );
    }

    #[test]
    fn test_missing_box_format_is_rejected() {
        let parsed: std::result::Result<DetectionsDocument, _> =
            serde_json::from_str(r#"{"detections": []}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_detections_path_keeps_dotted_stem() {
        let detector = JsonDetections::new("det");
        assert_eq!(
            detector.path_for(Path::new("frames/clip.part1.jpg")),
            Some(PathBuf::from("det/clip.part1.json"))
        );
        assert_eq!(
            detector.path_for(Path::new("frames/clip.part2.jpg")),
            Some(PathBuf::from("det/clip.part2.json"))
        );
    }

    #[test]
    fn test_json_detections_reads_by_stem() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join("frame_00000060.json"),
            r#"{"box_format": "corner", "detections": [
                {"class_id": 5, "confidence": 0.5, "bbox": [1.0, 2.0, 3.0, 4.0]}
            ]}"#,
        )
        .unwrap();
        let detector = JsonDetections::new(temp_dir.path());

        let detections = detector
            .detect(Path::new("frames/frame_00000060.jpg"), 0.25)
            .unwrap();
        assert_eq!(detections[0].class_id, 5);
        assert_eq!(
            detections[0].bbox,
            BoundingBox::Corner {
                x: 1.0,
                y: 2.0,
                w: 3.0,
                h: 4.0
            }
        );

        let missing = detector
            .detect(Path::new("frames/frame_00000090.jpg"), 0.25)
            .unwrap_err();
        assert!(matches!(missing, Video2YoloError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
