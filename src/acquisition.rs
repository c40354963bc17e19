//! Video download through the `yt-dlp` executable.

use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use crate::error::{Result, Video2YoloError};

const DOWNLOADER: &str = "yt-dlp";

/// Download `url` as MP4 into `out_dir` and return the local file.
pub fn download_video(url: &str, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)?;

    let template = out_dir.join("%(title)s.%(ext)s");
    info!("[{}] downloading {}", DOWNLOADER, url);
    let output = Command::new(DOWNLOADER)
        .arg("-f")
        .arg("mp4")
        .arg("-o")
        .arg(&template)
        .arg(url)
        .output()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Video2YoloError::Acquisition(format!("'{}' not found in PATH", DOWNLOADER))
            } else {
                Video2YoloError::Acquisition(format!("failed to start {}: {}", DOWNLOADER, e))
            }
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        debug!("[{}] {}", DOWNLOADER, line);
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Video2YoloError::Acquisition(format!(
            "{} exited with {}: {}",
            DOWNLOADER,
            output.status,
            stderr.trim()
        )));
    }

    newest_video(out_dir)?.ok_or_else(|| {
        Video2YoloError::Acquisition(format!(
            "no MP4 found in {} after download",
            out_dir.display()
        ))
    })
}

/// The most recently modified `.mp4` directly inside `dir`.
pub fn newest_video(dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_mp4 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"));
        if !is_mp4 || !path.is_file() {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
