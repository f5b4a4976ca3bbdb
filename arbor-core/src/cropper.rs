//! Crop extraction for detected trees and defects.
//!
//! Normalized boxes are mapped onto the true pixel grid of the full-resolution source photo,
//! clamped to a non-empty in-bounds rectangle, and written next to other crops under a name
//! built from the owning record, a category tag and the capture timestamp.

use std::path::{Path, PathBuf};

use arbor_utils::{OutputOptions, save_dynamic_image, timing_guard};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView};

use crate::{
    error::{PipelineError, Result},
    geometry::{NormalizedRect, PixelRect, clamped_pixel_rect},
};

/// Where crops are written and how they are encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CropTarget {
    pub dir: PathBuf,
    pub options: OutputOptions,
}

impl CropTarget {
    pub fn new(dir: impl Into<PathBuf>, options: OutputOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
        }
    }
}

/// A persisted crop and the pixel rectangle it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct CropOutput {
    pub path: PathBuf,
    pub rect: PixelRect,
}

/// Cut `rect` out of an in-memory photo using the photo's own dimensions.
pub fn crop_region(image: &DynamicImage, rect: NormalizedRect) -> Result<(DynamicImage, PixelRect)> {
    let (width, height) = image.dimensions();
    let pixel = clamped_pixel_rect(rect, width, height).ok_or_else(|| {
        PipelineError::Decode(format!("cannot crop from a {width}x{height} image"))
    })?;
    let cropped = image.crop_imm(pixel.x, pixel.y, pixel.width, pixel.height);
    Ok((cropped, pixel))
}

/// Pick a crop file path that does not exist yet.
///
/// The name is `{owner}_{tag}_{timestamp}.{ext}`; numeric suffixes resolve collisions.
pub fn crop_destination(
    target: &CropTarget,
    owner: &str,
    tag: &str,
    timestamp: DateTime<Utc>,
) -> PathBuf {
    let stem = format!(
        "{}_{}_{}",
        sanitize_component(owner),
        sanitize_component(tag),
        timestamp.format("%Y%m%dT%H%M%S%3fZ")
    );
    let ext = target.options.format.extension();

    let mut candidate = target.dir.join(format!("{stem}.{ext}"));
    let mut counter = 1usize;
    while candidate.exists() {
        candidate = target.dir.join(format!("{stem}_{counter}.{ext}"));
        counter += 1;
    }
    candidate
}

/// Crop an in-memory photo and persist the result.
pub fn crop_to_file(
    image: &DynamicImage,
    rect: NormalizedRect,
    target: &CropTarget,
    owner: &str,
    tag: &str,
    timestamp: DateTime<Utc>,
) -> Result<CropOutput> {
    let _guard = timing_guard("arbor_core::crop_to_file", log::Level::Debug);
    let (cropped, pixel) = crop_region(image, rect)?;
    let path = crop_destination(target, owner, tag, timestamp);
    save_dynamic_image(&cropped, &path, &target.options)
        .map_err(|e| PipelineError::io(&path, e))?;
    log::debug!(
        "saved {}x{} crop at ({}, {}) to {}",
        pixel.width,
        pixel.height,
        pixel.x,
        pixel.y,
        path.display()
    );
    Ok(CropOutput { path, rect: pixel })
}

/// Read a source photo from disk, crop it and persist the result.
pub fn crop_source(
    source: &Path,
    rect: NormalizedRect,
    target: &CropTarget,
    owner: &str,
    tag: &str,
    timestamp: DateTime<Utc>,
) -> Result<CropOutput> {
    let image = image::open(source).map_err(|e| PipelineError::from_image(source, e))?;
    crop_to_file(&image, rect, target, owner, tag, timestamp)
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "crop".to_string()
    } else {
        trimmed.to_string()
    }
}
