use glob::glob;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::decoder::DecodedFrame;
use crate::error::Result;
use crate::types::is_image_file;

/// Read and parse a JSON file straight from a buffered file stream.
pub fn read_and_parse_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Spinner for work whose length is not known up front
pub fn create_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] {{pos}} frames",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

/// Safely create output directories and return their paths
pub fn create_output_directory(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        log::warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path).and_then(|_| fs::create_dir_all(path))?;
    } else {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Write `contents` to a sibling temp file and rename it into place, so readers never
/// observe a partially written file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let written = File::create(&tmp_path).and_then(|file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(contents)?;
        writer.flush()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}

/// Encode an RGB frame as JPEG with the given quality.
pub fn write_jpeg(path: &Path, frame: &DecodedFrame, quality: u8) -> Result<()> {
    let mut buffer = Vec::with_capacity(frame.data.len() / 4);
    JpegEncoder::new_with_quality(&mut buffer, quality).encode(
        &frame.data,
        frame.width,
        frame.height,
        ColorType::Rgb8,
    )?;
    write_atomically(path, &buffer)?;
    Ok(())
}

/// List the images directly inside `dir`, sorted by path.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut images: Vec<PathBuf> = glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file() && is_image_file(path))
        .collect();
    images.sort();
    Ok(images)
}

/// Sanitized file stem used to pair images with label and detection files.
pub fn file_stem_of(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(sanitize_filename::sanitize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomically_replaces_contents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out.txt");
        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!temp_dir.path().join("out.txt.tmp").exists());
    }

    #[test]
    fn test_write_atomically_leaves_no_temp_file_on_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A directory at the destination makes the final rename fail.
        let path = temp_dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        File::create(path.join("keep")).unwrap();

        assert!(write_atomically(&path, b"data").is_err());
        assert!(!temp_dir.path().join("taken.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn test_collect_images_filters_and_sorts() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.PNG", "notes.txt", "c.jpeg"] {
            File::create(temp_dir.path().join(name)).unwrap();
        }
        let names: Vec<String> = collect_images(temp_dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg", "c.jpeg"]);
    }

    #[test]
    fn test_write_jpeg_roundtrips_dimensions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("frame.jpg");
        let frame = DecodedFrame {
            width: 8,
            height: 4,
            data: vec![128; 8 * 4 * 3],
        };
        write_jpeg(&path, &frame, 95).unwrap();
        assert_eq!(image::image_dimensions(&path).unwrap(), (8, 4));
    }
}
