use std::path::Path;

use arbor_utils::timing_guard;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::{
    cropper::{CropTarget, crop_to_file},
    error::{PipelineError, Result},
    geometry::{BoxRecord, NormalizedBox},
};

/// Category tag used in tree crop file names.
pub const TREE_CROP_TAG: &str = "tree";

/// A persisted tree record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntity {
    /// Row id, assigned by the record store on insert.
    pub id: Option<i64>,
    pub image_path: String,
    pub bbox: BoxRecord,
    pub captured_at: DateTime<Utc>,
    pub description: String,
    pub auxiliary_images: Vec<String>,
    /// Missing when the crop could not be produced.
    pub crop_path: Option<String>,
    pub taxon: Option<String>,
}

/// Turn the selected detections of one run into tree records.
///
/// The source photo is read once. A crop failure leaves that record without a crop and does not
/// abort the batch. Every record shares `captured_at` and starts with an empty description and no
/// auxiliary images. Fails with [`PipelineError::Validation`] before touching any file when no
/// detection is selected.
pub fn assemble(
    source: &Path,
    boxes: &[NormalizedBox],
    target: &CropTarget,
    captured_at: DateTime<Utc>,
) -> Result<Vec<TreeEntity>> {
    ensure_selection(boxes)?;
    let image = match image::open(source) {
        Ok(image) => Some(image),
        Err(err) => {
            log::warn!(
                "{}; trees will be saved without crops",
                PipelineError::from_image(source, err)
            );
            None
        }
    };
    Ok(assemble_with_image(
        source,
        image.as_ref(),
        boxes,
        target,
        captured_at,
    ))
}

/// Same as [`assemble`] with the photo already decoded. `None` means it could not be read.
pub fn assemble_with_image(
    source: &Path,
    image: Option<&DynamicImage>,
    boxes: &[NormalizedBox],
    target: &CropTarget,
    captured_at: DateTime<Utc>,
) -> Vec<TreeEntity> {
    let _guard = timing_guard("arbor_core::assemble", log::Level::Debug);
    let image_path = source.to_string_lossy().into_owned();

    boxes
        .iter()
        .filter(|b| b.selected)
        .map(|detection| {
            let crop_path = image.and_then(|image| {
                match crop_to_file(
                    image,
                    detection.rect(),
                    target,
                    &detection.identifier,
                    TREE_CROP_TAG,
                    captured_at,
                ) {
                    Ok(output) => Some(output.path.to_string_lossy().into_owned()),
                    Err(err) => {
                        log::warn!("crop for {} failed: {err}", detection.identifier);
                        None
                    }
                }
            });

            TreeEntity {
                id: None,
                image_path: image_path.clone(),
                bbox: detection.to_record(),
                captured_at,
                description: String::new(),
                auxiliary_images: Vec::new(),
                crop_path,
                taxon: None,
            }
        })
        .collect()
}

fn ensure_selection(boxes: &[NormalizedBox]) -> Result<()> {
    if boxes.iter().any(|b| b.selected) {
        Ok(())
    } else {
        Err(PipelineError::Validation(
            "at least one detection must be selected to save".into(),
        ))
    }
}
