//! Video decoding backends for the frame sampler.
//!
//! The sampler only needs random access by frame index plus sequential reads, so the
//! decoder is a small trait. The production backend probes the file with `ffprobe` and
//! pulls single RGB frames out of `ffmpeg` through `ffmpeg-sidecar`; tests swap in a
//! scripted decoder.

use ffmpeg_sidecar::command::FfmpegCommand;
use ffprobe::ffprobe;
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::error::{Result, Video2YoloError};
use crate::types::{VideoSource, DEFAULT_FPS};

/// A decoded frame as packed RGB24 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Random-access frame reader over one open video.
pub trait FrameDecoder {
    /// Frames per second; zero when unknown.
    fn frame_rate(&self) -> f64;

    /// Total frame count; zero when unknown.
    fn total_frames(&self) -> u64;

    /// Position the decoder so the next read returns `frame_index`.
    fn seek(&mut self, frame_index: u64);

    /// Decode the frame at the current position and advance by one. `None` means
    /// end-of-stream or a decode failure.
    fn read(&mut self) -> Option<DecodedFrame>;

    /// Release decoder resources. Called once when sampling ends.
    fn release(&mut self) {}
}

/// Describe the open video, falling back to the default frame rate when the decoder
/// reports none.
pub fn video_source<D: FrameDecoder + ?Sized>(path: &Path, decoder: &D) -> VideoSource {
    let fps = decoder.frame_rate();
    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        warn!(
            "No frame rate reported for {}, assuming {} fps",
            path.display(),
            DEFAULT_FPS
        );
        DEFAULT_FPS
    };
    VideoSource::new(path, fps, decoder.total_frames())
}

/// Decoder backed by the `ffprobe` and `ffmpeg` executables.
#[derive(Debug)]
pub struct FfmpegDecoder {
    path: PathBuf,
    fps: f64,
    total_frames: u64,
    position: u64,
}

impl FfmpegDecoder {
    /// Probe `path` and fail with `VideoOpen` if it has no decodable video stream.
    pub fn open(path: &Path) -> Result<Self> {
        let open_error = |reason: String| Video2YoloError::VideoOpen {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(open_error("file does not exist".to_string()));
        }

        debug!("Running ffprobe for stream info on: {}", path.display());
        let metadata = ffprobe(path).map_err(|e| open_error(format!("ffprobe failed: {}", e)))?;

        let stream = metadata
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| open_error("no video stream found".to_string()))?;

        let fps = parse_frame_rate(&stream.avg_frame_rate)
            .or_else(|| parse_frame_rate(&stream.r_frame_rate))
            .unwrap_or(0.0);

        let total_frames = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.trim().parse::<u64>().ok())
            .filter(|&n| n > 0)
            .or_else(|| {
                // Containers such as mkv omit nb_frames; estimate from the duration.
                let duration = metadata
                    .format
                    .duration
                    .as_deref()
                    .and_then(|d| d.parse::<f64>().ok())?;
                (fps > 0.0 && duration > 0.0).then(|| (duration * fps).floor() as u64)
            })
            .unwrap_or(0);

        debug!(
            "Opened {}: {:.3} fps, {} frames",
            path.display(),
            fps,
            total_frames
        );

        Ok(Self {
            path: path.to_path_buf(),
            fps,
            total_frames,
            position: 0,
        })
    }

    fn decode_at(&self, frame_index: u64) -> Option<DecodedFrame> {
        let fps = if self.fps > 0.0 { self.fps } else { DEFAULT_FPS };
        let seconds = frame_index as f64 / fps;

        let mut cmd = FfmpegCommand::new();
        cmd.hide_banner()
            .seek(format!("{:.6}", seconds))
            .input(&self.path)
            .frames(1)
            .rawvideo();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to spawn ffmpeg for frame {}: {}", frame_index, e);
                return None;
            }
        };

        let frame = match child.iter() {
            Ok(events) => events.filter_frames().next(),
            Err(e) => {
                debug!("Failed to read ffmpeg output for frame {}: {}", frame_index, e);
                None
            }
        };
        if let Err(e) = child.wait() {
            debug!("ffmpeg did not exit cleanly for frame {}: {}", frame_index, e);
        }

        let frame = frame?;
        let expected_len = frame.width as usize * frame.height as usize * 3;
        if frame.width == 0 || frame.height == 0 || frame.data.len() != expected_len {
            debug!(
                "Discarding malformed frame {}: {}x{} with {} bytes",
                frame_index,
                frame.width,
                frame.height,
                frame.data.len()
            );
            return None;
        }

        Some(DecodedFrame {
            width: frame.width,
            height: frame.height,
            data: frame.data,
        })
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn seek(&mut self, frame_index: u64) {
        self.position = frame_index;
    }

    fn read(&mut self) -> Option<DecodedFrame> {
        if self.total_frames > 0 && self.position >= self.total_frames {
            return None;
        }
        let frame = self.decode_at(self.position);
        self.position += 1;
        frame
    }
}

/// Parse an ffprobe rational such as `30000/1001` or a plain number.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let rate = rate.trim();
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse::<f64>().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
