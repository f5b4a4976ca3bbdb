//! Core tree detection pipeline.
//!
//! This crate turns photos into the detector's input tensor, decodes raw detections into ranked
//! normalized boxes, maps boxes onto source pixels for cropping, and persists tree and defect
//! records in SQLite.

/// Record assembly from selected detections.
pub mod assembler;
/// Crop extraction and crop file naming.
pub mod cropper;
/// Defect and classification service responses.
pub mod defects;
/// High-level tree detection runner.
pub mod detector;
/// Pipeline error kinds.
pub mod error;
/// Normalized, display, and pixel coordinate frames.
pub mod geometry;
/// ONNX model loading and execution.
pub mod model;
/// Detection decoding (threshold, normalization, ranking).
pub mod postprocess;
/// Image pre-processing (resizing, tensor conversion).
pub mod preprocess;
/// Inventory report feed.
pub mod report;
/// SQLite record store.
pub mod store;

pub use assembler::{TREE_CROP_TAG, TreeEntity, assemble, assemble_with_image};
pub use cropper::{CropOutput, CropTarget, crop_destination, crop_region, crop_source, crop_to_file};
pub use defects::{
    ClassificationResponse, ClassificationService, DefectEntity, DefectPrediction, DefectResponse,
    DefectService, assemble_defects, filter_defects, filter_defects_default,
};
pub use detector::{DetectionRun, TreeDetector};
pub use error::{PipelineError, Result};
pub use geometry::{
    BoxRecord, ContainLayout, CornerBox, DisplayRect, NormalizedBox, NormalizedRect, PixelRect,
    box_at_display_point, clamped_pixel_rect, normalized_to_pixel,
};
pub use model::{InferenceBackend, ReplayBackend, TreeModel, input_tensor};
pub use postprocess::{
    DETECTION_COLUMNS, DecodeConfig, RawDetection, apply_postprocess, decode_rows, rows_to_tensor,
    select_only, selected_count,
};
pub use preprocess::{
    CpuPreprocessor, PreprocessConfig, PreprocessedTensor, Preprocessor, preprocess_dynamic_image,
    preprocess_image, preprocess_image_with,
};
pub use report::{InventoryReport, TreeReport, build_report};
pub use store::RecordStore;

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
