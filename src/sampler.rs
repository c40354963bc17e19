//! Deterministic frame sampling.
//!
//! Target timestamps are laid out at a fixed interval, each one is resolved to the
//! nearest frame index, and that frame is decoded and written as a JPEG. Frames that
//! cannot be decoded are skipped with a warning; the run keeps going.

use log::{debug, info, warn};
use std::fs;
use std::path::Path;

use crate::decoder::{video_source, DecodedFrame, FfmpegDecoder, FrameDecoder};
use crate::error::{validation_error, Result, Video2YoloError};
use crate::types::{FrameSample, Manifest, SamplingPolicy, SamplingStats, VideoSource, JPEG_QUALITY};
use crate::utils::{create_progress_bar, create_spinner, write_jpeg};

// Absorbs float error in start + k * interval when comparing against a bound.
const TIME_EPSILON: f64 = 1e-9;

/// Lazily generated target timestamps: `start + k * interval` for k = 0, 1, 2, ...
#[derive(Debug, Clone)]
pub struct TargetTimes {
    start: f64,
    interval: f64,
    end: Option<f64>,
    ceiling: Option<f64>,
    limit: Option<usize>,
    next: usize,
}

impl TargetTimes {
    /// Whether an end time or the video duration bounds the sequence.
    pub fn is_bounded(&self) -> bool {
        self.end.is_some() || self.ceiling.is_some()
    }

    /// Whether the sequence is known to be finite.
    pub fn is_finite(&self) -> bool {
        self.is_bounded() || self.limit.is_some()
    }
}

impl Iterator for TargetTimes {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.limit.is_some_and(|limit| self.next >= limit) {
            return None;
        }
        let t = self.start + self.next as f64 * self.interval;
        if self.end.is_some_and(|end| t > end + TIME_EPSILON) {
            return None;
        }
        // The duration is a hard ceiling even when the requested end lies beyond it.
        if self.ceiling.is_some_and(|duration| t > duration + TIME_EPSILON) {
            return None;
        }
        self.next += 1;
        Some(t)
    }
}

/// Resolve the sampling window for `video` and lay out its target timestamps.
pub fn target_times(video: &VideoSource, policy: &SamplingPolicy) -> TargetTimes {
    let duration = video.duration();
    TargetTimes {
        start: policy.start_seconds,
        interval: policy.interval_seconds,
        end: policy.end_seconds.or(duration),
        ceiling: duration,
        limit: policy.max_frames,
        next: 0,
    }
}

/// Nearest frame to `seconds`, never negative and clamped to the last frame when the
/// frame count is known.
pub fn resolve_frame_index(seconds: f64, fps: f64, total_frames: u64) -> u64 {
    let index = (seconds * fps).round();
    let index = if index.is_finite() && index > 0.0 {
        index as u64
    } else {
        0
    };
    if total_frames > 0 {
        index.min(total_frames - 1)
    } else {
        index
    }
}

fn is_usable(frame: &DecodedFrame) -> bool {
    frame.width > 0
        && frame.height > 0
        && frame.data.len() == frame.width as usize * frame.height as usize * 3
}

/// Seek to `frame_index` and read it. One supplementary sequential read is attempted
/// when the first read comes back empty; the returned flag tells whether it was needed.
pub fn read_with_retry<D: FrameDecoder + ?Sized>(
    decoder: &mut D,
    frame_index: u64,
    target_seconds: f64,
) -> Result<(DecodedFrame, bool)> {
    decoder.seek(frame_index);
    if let Some(frame) = decoder.read().filter(is_usable) {
        return Ok((frame, false));
    }
    // Some decoders return nothing right at a keyframe boundary.
    if let Some(frame) = decoder.read().filter(is_usable) {
        return Ok((frame, true));
    }
    Err(Video2YoloError::FrameRead {
        frame_index,
        target_seconds,
    })
}

/// Sample frames from an open decoder into `out_dir`.
///
/// The policy is validated before any frame I/O. Returns the manifest in production
/// order, which is ascending frame index. The decoder is released before returning,
/// whether or not sampling succeeded.
pub fn sample_frames<D: FrameDecoder + ?Sized>(
    decoder: &mut D,
    video: &VideoSource,
    policy: &SamplingPolicy,
    out_dir: &Path,
) -> Result<(Manifest, SamplingStats)> {
    let result = run_sampling(decoder, video, policy, out_dir);
    decoder.release();
    result
}

fn run_sampling<D: FrameDecoder + ?Sized>(
    decoder: &mut D,
    video: &VideoSource,
    policy: &SamplingPolicy,
    out_dir: &Path,
) -> Result<(Manifest, SamplingStats)> {
    policy.validate()?;
    if !video.fps.is_finite() || video.fps <= 0.0 {
        return Err(validation_error(format!(
            "frame rate must be positive, got {}",
            video.fps
        )));
    }
    // Without an explicit end the window closes at the video duration.
    if let Some(end) = policy.end_seconds.or(video.duration()) {
        if end < policy.start_seconds {
            return Err(validation_error(format!(
                "end ({:.3}s) must be >= start ({:.3}s)",
                end, policy.start_seconds
            )));
        }
    }

    fs::create_dir_all(out_dir)?;

    let targets = target_times(video, policy);
    let bounded = targets.is_bounded();
    if !bounded {
        info!(
            "Video duration unknown and no end time given; sampling until end of stream{}",
            policy
                .max_frames
                .map(|n| format!(" or {} frames", n))
                .unwrap_or_default()
        );
    }

    let pb = if targets.is_finite() {
        create_progress_bar(targets.clone().count() as u64, "Extract")
    } else {
        create_spinner("Extract")
    };

    let mut manifest = Manifest::new();
    let mut stats = SamplingStats::default();
    let mut last_index: Option<u64> = None;

    for target in targets {
        stats.target_timestamps += 1;
        let frame_index = resolve_frame_index(target, video.fps, video.total_frames);

        // Targets closer together than one frame resolve to the same index.
        if last_index == Some(frame_index) {
            debug!(
                "Target {:.3}s resolves to already saved frame {}",
                target, frame_index
            );
            pb.inc(1);
            continue;
        }

        match read_with_retry(decoder, frame_index, target) {
            Ok((frame, retried)) => {
                if retried {
                    stats.retried_reads += 1;
                }
                let sample = FrameSample::new(frame_index, video.fps, frame.width, frame.height);
                write_jpeg(&out_dir.join(&sample.filename), &frame, JPEG_QUALITY)?;
                last_index = Some(frame_index);
                manifest.push(sample);
                stats.saved_frames += 1;
            }
            Err(e) if e.is_recoverable() => {
                warn!("{}", e);
                stats.skipped_frames += 1;
                if !bounded {
                    info!("Treating unreadable frame {} as end of stream", frame_index);
                    pb.inc(1);
                    break;
                }
            }
            Err(e) => return Err(e),
        }
        pb.inc(1);
    }

    pb.finish_with_message("Extraction complete");
    Ok((manifest, stats))
}

/// Open `video_path` with ffmpeg and sample it into `out_dir`.
pub fn sample_video(
    video_path: &Path,
    policy: &SamplingPolicy,
    out_dir: &Path,
) -> Result<(Manifest, SamplingStats)> {
    policy.validate()?;
    let mut decoder = FfmpegDecoder::open(video_path)?;
    let video = video_source(video_path, &decoder);
    info!(
        "Sampling {} ({:.3} fps, {} frames) every {}s",
        video.path.display(),
        video.fps,
        video.total_frames,
        policy.interval_seconds
    );
    sample_frames(&mut decoder, &video, policy, out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(fps: f64, total_frames: u64) -> VideoSource {
        VideoSource::new("test.mp4", fps, total_frames)
    }

    fn policy(interval: f64, start: f64, end: Option<f64>) -> SamplingPolicy {
        SamplingPolicy::new(interval, start, end).unwrap()
    }

    #[test]
    fn test_target_times_default_to_duration() {
        let times: Vec<f64> = target_times(&video(30.0, 300), &policy(2.0, 0.0, None)).collect();
        assert_eq!(times, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_duration_caps_requested_end() {
        let times: Vec<f64> =
            target_times(&video(10.0, 50), &policy(3.0, 1.0, Some(100.0))).collect();
        assert_eq!(times, vec![1.0, 4.0]);
    }

    #[test]
    fn test_end_time_within_duration() {
        let times: Vec<f64> =
            target_times(&video(30.0, 3000), &policy(0.5, 1.0, Some(2.6))).collect();
        assert_eq!(times, vec![1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_unbounded_targets_respect_limit() {
        let targets = target_times(
            &video(25.0, 0),
            &policy(1.0, 0.0, None).with_max_frames(Some(4)),
        );
        assert!(!targets.is_bounded());
        assert!(targets.is_finite());
        assert_eq!(targets.count(), 4);
    }

    #[test]
    fn test_small_intervals_do_not_drift() {
        let times: Vec<f64> = target_times(&video(30.0, 300), &policy(0.1, 0.0, None)).collect();
        assert_eq!(times.len(), 101);
        for pair in times.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!((pair[1] - pair[0] - 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn test_resolve_frame_index() {
        assert_eq!(resolve_frame_index(0.0, 30.0, 300), 0);
        assert_eq!(resolve_frame_index(2.0, 30.0, 300), 60);
        assert_eq!(resolve_frame_index(10.0, 30.0, 300), 299);
        assert_eq!(resolve_frame_index(1.01, 30.0, 0), 30);
        assert_eq!(resolve_frame_index(1.02, 30.0, 0), 31);
        assert_eq!(resolve_frame_index(-3.0, 30.0, 300), 0);
        assert_eq!(resolve_frame_index(1000.0, 30.0, 0), 30000);
    }
}
