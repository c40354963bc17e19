use std::fs;
use std::path::Path;

use crate::error::{validation_error, Result};
use crate::types::{FrameSample, Manifest, MANIFEST_HEADER};
use crate::utils::write_atomically;

/// Render the manifest as CSV with a header row.
pub fn manifest_to_csv(manifest: &Manifest) -> String {
    let mut csv = String::with_capacity(MANIFEST_HEADER.len() + 1 + manifest.len() * 48);
    csv.push_str(MANIFEST_HEADER);
    csv.push('\n');
    for sample in manifest {
        csv.push_str(&format!(
            "{},{},{},{},{:.3}\n",
            sample.filename,
            sample.width,
            sample.height,
            sample.frame_index,
            sample.timestamp_seconds
        ));
    }
    csv
}

/// Write the manifest in one piece; an existing file is replaced only once the new one
/// is complete.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_atomically(path, manifest_to_csv(manifest).as_bytes())?;
    Ok(())
}

/// Parse a manifest written by [`write_manifest`].
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path)?;
    parse_manifest(&content)
        .map_err(|e| validation_error(format!("{}: {}", path.display(), e)))
}

pub fn parse_manifest(content: &str) -> std::result::Result<Manifest, String> {
    let mut lines = content.lines().enumerate();

    match lines.next() {
        Some((_, header)) if header.trim() == MANIFEST_HEADER => {}
        Some((_, header)) => return Err(format!("unexpected manifest header '{}'", header)),
        None => return Err("manifest is empty".to_string()),
    }

    let mut manifest = Manifest::new();
    for (line_idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let line_num = line_idx + 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 5 {
            return Err(format!(
                "line {}: expected 5 fields, found {}",
                line_num,
                fields.len()
            ));
        }
        let field_error = |name: &str| format!("line {}: invalid {} '{}'", line_num, name, line);
        manifest.push(FrameSample {
            filename: fields[0].to_string(),
            width: fields[1].parse().map_err(|_| field_error("width"))?,
            height: fields[2].parse().map_err(|_| field_error("height"))?,
            frame_index: fields[3].parse().map_err(|_| field_error("frame_idx"))?,
            timestamp_seconds: fields[4].parse().map_err(|_| field_error("timestamp_sec"))?,
        });
    }
    Ok(manifest)
}
