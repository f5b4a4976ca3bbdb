//! Typed responses from the remote classification and defect services.
//!
//! Payloads are validated on parse; anything malformed is a [`PipelineError::Response`] rather
//! than an unchecked field access further down.

use std::path::Path;

use arbor_utils::{config::DEFAULT_DEFECT_THRESHOLD, timing_guard};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::{
    cropper::{CropTarget, crop_to_file},
    error::{PipelineError, Result},
    geometry::{CornerBox, NormalizedBox},
};

/// One defect found by the defect service, corners normalized to the analysed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectPrediction {
    #[serde(default)]
    pub key: String,
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl DefectPrediction {
    fn validate(&self) -> Result<()> {
        let values = [self.confidence, self.x1, self.y1, self.x2, self.y2];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Response(format!(
                "defect '{}' carries a non-finite value",
                self.label
            )));
        }
        if self.label.trim().is_empty() {
            return Err(PipelineError::Response("defect label is empty".into()));
        }
        if self.x2 < self.x1 || self.y2 < self.y1 {
            return Err(PipelineError::Response(format!(
                "defect '{}' has inverted corners",
                self.label
            )));
        }
        Ok(())
    }

    /// Corner form clamped to `[0, 1]`, as persisted.
    pub fn corners(&self) -> CornerBox {
        let b = self.to_normalized_box();
        CornerBox {
            xtl: b.x,
            ytl: b.y,
            xbr: b.x_bottom_right,
            ybr: b.y_bottom_right,
        }
    }

    pub fn to_normalized_box(&self) -> NormalizedBox {
        let mut b = NormalizedBox::from_corners(self.x1, self.y1, self.x2, self.y2, self.confidence);
        b.identifier = self.key.clone();
        b
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefectPayload {
    Bare(Vec<DefectPrediction>),
    Wrapped { detections: Vec<DefectPrediction> },
}

/// Parsed defect service response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefectResponse {
    pub predictions: Vec<DefectPrediction>,
}

impl DefectResponse {
    /// Parse either a bare JSON array or an object with a `detections` array.
    pub fn from_json(payload: &str) -> Result<Self> {
        let parsed: DefectPayload = serde_json::from_str(payload)
            .map_err(|e| PipelineError::Response(format!("defect response: {e}")))?;
        let predictions = match parsed {
            DefectPayload::Bare(list) => list,
            DefectPayload::Wrapped { detections } => detections,
        };
        predictions.iter().try_for_each(DefectPrediction::validate)?;
        Ok(Self { predictions })
    }
}

/// Keep predictions scoring strictly above `threshold`, in response order.
pub fn filter_defects(response: &DefectResponse, threshold: f32) -> Vec<DefectPrediction> {
    response
        .predictions
        .iter()
        .filter(|p| p.confidence > threshold)
        .cloned()
        .collect()
}

/// [`filter_defects`] with the default threshold.
pub fn filter_defects_default(response: &DefectResponse) -> Vec<DefectPrediction> {
    filter_defects(response, DEFAULT_DEFECT_THRESHOLD)
}

/// Parsed species classification response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl ClassificationResponse {
    pub fn from_json(payload: &str) -> Result<Self> {
        let parsed: ClassificationResponse = serde_json::from_str(payload)
            .map_err(|e| PipelineError::Response(format!("classification response: {e}")))?;
        if parsed.label.trim().is_empty() {
            return Err(PipelineError::Response("classification label is empty".into()));
        }
        if parsed.confidence.is_some_and(|c| !c.is_finite()) {
            return Err(PipelineError::Response(
                "classification confidence is not finite".into(),
            ));
        }
        Ok(parsed)
    }
}

/// Remote species classifier.
pub trait ClassificationService {
    fn classify(&self, image: &Path) -> Result<ClassificationResponse>;
}

/// Remote defect detector.
pub trait DefectService {
    fn detect_defects(&self, image: &Path) -> Result<DefectResponse>;
}

/// A persisted defect record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectEntity {
    pub id: Option<i64>,
    pub tree_id: i64,
    pub bbox: CornerBox,
    pub image_path: String,
    /// Missing when the crop could not be produced.
    pub crop_path: Option<String>,
    pub defect_type: String,
}

/// Build defect records for one tree, cropping each defect from `image` in turn.
///
/// Crop failures are logged and leave `crop_path` empty.
pub fn assemble_defects(
    tree_id: i64,
    source: &Path,
    image: Option<&DynamicImage>,
    predictions: &[DefectPrediction],
    target: &CropTarget,
    timestamp: DateTime<Utc>,
) -> Vec<DefectEntity> {
    let _guard = timing_guard("arbor_core::assemble_defects", log::Level::Debug);
    let image_path = source.to_string_lossy().into_owned();
    let owner = format!("tree{tree_id}");

    predictions
        .iter()
        .map(|prediction| {
            let tag = if prediction.key.is_empty() {
                prediction.label.as_str()
            } else {
                prediction.key.as_str()
            };
            let crop_path = image.and_then(|image| {
                match crop_to_file(
                    image,
                    prediction.to_normalized_box().rect(),
                    target,
                    &owner,
                    tag,
                    timestamp,
                ) {
                    Ok(output) => Some(output.path.to_string_lossy().into_owned()),
                    Err(err) => {
                        log::warn!("crop for defect '{}' failed: {err}", prediction.label);
                        None
                    }
                }
            });

            DefectEntity {
                id: None,
                tree_id,
                bbox: prediction.corners(),
                image_path: image_path.clone(),
                crop_path,
                defect_type: prediction.label.clone(),
            }
        })
        .collect()
}
