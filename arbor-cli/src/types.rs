//! Shared types and conversions for arbor-cli output.

use arbor_core::NormalizedBox;
use serde::Serialize;

/// A serializable representation of a single detection.
#[derive(Debug, Serialize)]
pub struct DetectionRecord {
    pub identifier: String,
    pub confidence: f32,
    pub selected: bool,
    /// `[x, y, width, height]`, normalized.
    pub bbox: [f32; 4],
    /// `[x_bottom_right, y_bottom_right]`, normalized.
    pub bottom_right: [f32; 2],
}

/// A serializable representation of all detections for a single image.
#[derive(Debug, Serialize)]
pub struct ImageDetections {
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<DetectionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated: Option<String>,
}

impl From<&NormalizedBox> for DetectionRecord {
    fn from(detection: &NormalizedBox) -> Self {
        Self {
            identifier: detection.identifier.clone(),
            confidence: detection.confidence,
            selected: detection.selected,
            bbox: [detection.x, detection.y, detection.width, detection.height],
            bottom_right: [detection.x_bottom_right, detection.y_bottom_right],
        }
    }
}
