use thiserror::Error;

/// Errors raised while building a dataset from video.
///
/// `FrameRead` is the only recoverable variant: the sampler logs it and moves on to the
/// next target timestamp. Everything else aborts the run before a manifest is written.
#[derive(Error, Debug)]
pub enum Video2YoloError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Video acquisition failed: {0}")]
    Acquisition(String),

    #[error("Cannot open video {path}: {reason}")]
    VideoOpen { path: String, reason: String },

    #[error("Could not read frame {frame_index} (~{target_seconds:.2}s)")]
    FrameRead {
        frame_index: u64,
        target_seconds: f64,
    },

    #[error("{failed} of {total} frames could not be labeled")]
    Labeling { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

impl Video2YoloError {
    /// Whether the run can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Video2YoloError::FrameRead { .. })
    }
}

pub type Result<T> = std::result::Result<T, Video2YoloError>;

pub(crate) fn validation_error(message: impl Into<String>) -> Video2YoloError {
    Video2YoloError::Validation(message.into())
}
