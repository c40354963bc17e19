use log::{error, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fs::{self, copy, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{validation_error, Result};
use crate::types::{ClassMap, OutputDirs, SplitData};
use crate::utils::{collect_images, create_output_directory, create_progress_bar, file_stem_of};

/// Shuffle with a fixed seed and cut at `floor(len * train_ratio)`.
///
/// The input order matters for reproducibility, so callers pass a sorted list.
pub fn split_images(images: &mut Vec<PathBuf>, train_ratio: f64, seed: u64) -> SplitData {
    let mut rng = StdRng::seed_from_u64(seed);
    images.shuffle(&mut rng);

    let split_index = ((images.len() as f64 * train_ratio).floor() as usize).min(images.len());
    let val_images = images.split_off(split_index);
    let train_images = std::mem::take(images);

    SplitData {
        train_images,
        val_images,
    }
}

/// Set up the directory structure for the split dataset
pub fn setup_output_directories(output_dir: &Path) -> std::io::Result<OutputDirs> {
    let train_dir = output_dir.join("train");
    let val_dir = output_dir.join("val");

    Ok(OutputDirs {
        train_images_dir: create_output_directory(&train_dir.join("images"))?,
        train_labels_dir: create_output_directory(&train_dir.join("labels"))?,
        val_images_dir: create_output_directory(&val_dir.join("images"))?,
        val_labels_dir: create_output_directory(&val_dir.join("labels"))?,
    })
}

/// Copy one image, and its label file when a label source is given. A frame without a
/// label file gets an empty one, since both mean "no objects".
pub fn copy_sample(
    image_path: &Path,
    images_dir: &Path,
    label_source: Option<&Path>,
    labels_dir: &Path,
) -> std::io::Result<()> {
    let file_name = image_path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file path: {}", image_path.display()),
        )
    })?;
    copy(image_path, images_dir.join(file_name))?;

    if let Some(label_source) = label_source {
        let stem = file_stem_of(image_path).unwrap_or_default();
        let label_path = label_source.join(format!("{}.txt", stem));
        let label_output_path = labels_dir.join(format!("{}.txt", stem));
        if label_path.is_file() {
            copy(&label_path, &label_output_path)?;
        } else {
            File::create(&label_output_path)?;
        }
    }
    Ok(())
}

fn copy_split_in_parallel(
    images: &[PathBuf],
    images_dir: &Path,
    label_source: Option<&Path>,
    labels_dir: &Path,
    label: &str,
) -> usize {
    if images.is_empty() {
        return 0;
    }
    let pb = create_progress_bar(images.len() as u64, label);
    let failures = images
        .par_iter()
        .filter(|image_path| {
            let result = copy_sample(image_path, images_dir, label_source, labels_dir);
            pb.inc(1);
            match result {
                Ok(()) => false,
                Err(e) => {
                    error!("Failed to copy {}: {}", image_path.display(), e);
                    true
                }
            }
        })
        .count();
    pb.finish_with_message(format!("{} copy complete", label));
    failures
}

/// Create the dataset.yaml file for YOLO training
pub fn create_dataset_yaml(output_dir: &Path, class_map: &ClassMap) -> std::io::Result<()> {
    let dataset_yaml_path = output_dir.join("dataset.yaml");
    let mut dataset_yaml = BufWriter::new(File::create(&dataset_yaml_path)?);
    let absolute_path = fs::canonicalize(output_dir)?;
    let mut yaml_content = format!(
        "path: {}\ntrain: train/images\nval: val/images\n",
        absolute_path.to_string_lossy()
    );
    yaml_content.push_str("\nnames:\n");
    for (id, name) in class_map.names() {
        yaml_content.push_str(&format!("    {}: {}\n", id, name));
    }
    dataset_yaml.write_all(yaml_content.as_bytes())?;
    dataset_yaml.flush()
}

/// Partition the images in `images_dir` into train/val copies under `output_dir`.
pub fn process_split(
    images_dir: &Path,
    labels_dir: Option<&Path>,
    output_dir: &Path,
    train_ratio: f64,
    seed: u64,
    class_map: &ClassMap,
) -> Result<SplitData> {
    if !(0.0..=1.0).contains(&train_ratio) {
        return Err(validation_error(format!(
            "train ratio must be between 0.0 and 1.0, got {}",
            train_ratio
        )));
    }

    let mut images = collect_images(images_dir)?;
    info!("Found {} images in {}", images.len(), images_dir.display());

    let split_data = split_images(&mut images, train_ratio, seed);
    let output_dirs = setup_output_directories(output_dir)?;

    let failures = copy_split_in_parallel(
        &split_data.train_images,
        &output_dirs.train_images_dir,
        labels_dir,
        &output_dirs.train_labels_dir,
        "Train",
    ) + copy_split_in_parallel(
        &split_data.val_images,
        &output_dirs.val_images_dir,
        labels_dir,
        &output_dirs.val_labels_dir,
        "Val",
    );
    if failures > 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} files could not be copied", failures),
        )
        .into());
    }

    info!("Creating dataset.yaml file...");
    create_dataset_yaml(output_dir, class_map)?;

    info!(
        "Copied {} to train and {} to val.",
        split_data.train_images.len(),
        split_data.val_images.len()
    );
    Ok(split_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("frame_{:08}.jpg", i))).collect()
    }

    #[test]
    fn test_split_images_uses_floor() {
        let mut images = paths(9);
        let split_data = split_images(&mut images, 0.8, 42);
        assert_eq!(split_data.train_images.len(), 7);
        assert_eq!(split_data.val_images.len(), 2);
    }

    #[test]
    fn test_split_images_is_deterministic_and_disjoint() {
        let first = split_images(&mut paths(20), 0.8, 42);
        let second = split_images(&mut paths(20), 0.8, 42);
        assert_eq!(first.train_images, second.train_images);
        assert_eq!(first.val_images, second.val_images);

        let mut all: Vec<_> = first
            .train_images
            .iter()
            .chain(first.val_images.iter())
            .cloned()
            .collect();
        all.sort();
        assert_eq!(all, paths(20));
    }

    #[test]
    fn test_split_images_edge_ratios() {
        let all_train = split_images(&mut paths(5), 1.0, 7);
        assert_eq!(all_train.train_images.len(), 5);
        assert!(all_train.val_images.is_empty());

        let all_val = split_images(&mut paths(5), 0.0, 7);
        assert!(all_val.train_images.is_empty());
        assert_eq!(all_val.val_images.len(), 5);
    }

    #[test]
    fn test_create_dataset_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        create_dataset_yaml(temp_dir.path(), &ClassMap::default()).unwrap();

        let yaml_content = fs::read_to_string(temp_dir.path().join("dataset.yaml")).unwrap();
        assert!(yaml_content.contains("path:"));
        assert!(yaml_content.contains("train: train/images"));
        assert!(yaml_content.contains("val: val/images"));
        assert!(yaml_content.contains("names:"));
        assert!(yaml_content.contains("0: car"));
        assert!(yaml_content.contains("2: truck"));
    }
}
