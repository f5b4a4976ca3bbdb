//! Input collection and response file handling.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use arbor_core::DETECTION_COLUMNS;
use log::debug;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Collect all image paths from a file or directory.
pub fn collect_images(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if !path.is_dir() {
        anyhow::bail!(
            "input path is neither file nor directory: {}",
            path.display()
        );
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            let ext_lower = ext.to_ascii_lowercase();
            if IMAGE_EXTENSIONS.contains(&ext_lower.as_str()) {
                images.push(entry.path().to_path_buf());
            } else {
                debug!("Skipping non-image file {}", entry.path().display());
            }
        }
    }
    images.sort();
    Ok(images)
}

/// Read a UTF-8 response or rows file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Load raw detector rows from JSON.
pub fn load_raw_rows(path: &Path) -> Result<Vec<[f32; DETECTION_COLUMNS]>> {
    let payload = read_text(path)?;
    let rows: Vec<[f32; DETECTION_COLUMNS]> = serde_json::from_str(&payload).with_context(|| {
        format!(
            "{} must hold an array of {DETECTION_COLUMNS}-value detection rows",
            path.display()
        )
    })?;
    Ok(rows)
}
