//! Video to YOLO dataset builder
//!
//! This library samples frames from a video at a fixed time interval and converts
//! per-frame object-detector output into normalized YOLO label files.

pub mod acquisition;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod manifest;
pub mod sampler;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Cli, Command};
pub use conversion::{convert, label_frames, normalize_bbox, process_frames_in_parallel, FrameInput};
pub use decoder::{DecodedFrame, FfmpegDecoder, FrameDecoder};
pub use detector::{BoxFormat, Detector, JsonDetections};
pub use error::{Result, Video2YoloError};
pub use manifest::{read_manifest, write_manifest};
pub use sampler::{sample_frames, sample_video};
pub use types::{
    BoundingBox, ClassMap, Detection, FrameSample, LabelFile, LabelRecord, Manifest,
    SamplingPolicy, VideoSource,
};
