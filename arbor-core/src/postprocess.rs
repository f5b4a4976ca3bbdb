use std::cmp::Ordering;

use arbor_utils::{
    config::{DEFAULT_INPUT_SIDE, DEFAULT_TREE_THRESHOLD, DetectionSettings},
    timing_guard,
};
use tract_onnx::prelude::{Tensor, tract_ndarray::ArrayView2};

use crate::{
    error::{PipelineError, Result},
    geometry::NormalizedBox,
};

/// Floats per detection row: `x1, y1, x2, y2, confidence, class_id`.
pub const DETECTION_COLUMNS: usize = 6;

/// Decoding parameters for raw detector output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeConfig {
    /// Rows must score strictly above this value to be kept.
    pub confidence_threshold: f32,
    /// Side of the square network input the corner coordinates are expressed in.
    pub input_side: u32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_TREE_THRESHOLD,
            input_side: DEFAULT_INPUT_SIDE,
        }
    }
}

impl From<&DetectionSettings> for DecodeConfig {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            ..Default::default()
        }
    }
}

/// One row of network output, corners in absolute input-space pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Decoded but unused; the detector is single-class.
    pub class_id: f32,
}

impl RawDetection {
    pub fn from_row(row: [f32; DETECTION_COLUMNS]) -> Self {
        let [x1, y1, x2, y2, confidence, class_id] = row;
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }
}

/// Decode the detector output tensor into ranked, normalized boxes.
///
/// Accepts `[N, 6]` or `[1, N, 6]`. An unreadable detection count is an
/// [`PipelineError::InferenceOutput`]; a wrong column count is a [`PipelineError::Decode`].
pub fn apply_postprocess(output: &Tensor, config: &DecodeConfig) -> Result<Vec<NormalizedBox>> {
    let _guard = timing_guard("arbor_core::apply_postprocess", log::Level::Debug);
    let rows = detection_rows(output)?;
    let raw: Vec<RawDetection> = rows
        .rows()
        .into_iter()
        .map(|row| RawDetection::from_row([row[0], row[1], row[2], row[3], row[4], row[5]]))
        .collect();
    decode_rows(&raw, config)
}

/// Threshold, normalize, rank, and name raw detections.
///
/// Rows survive only when `confidence > threshold`. Corners are divided by the input side and
/// every coordinate field is clamped to `[0, 1]` on its own. The stable descending sort keeps
/// input order among equal scores, and identifiers `tree_1..` are assigned afterwards so they
/// follow rank order.
pub fn decode_rows(rows: &[RawDetection], config: &DecodeConfig) -> Result<Vec<NormalizedBox>> {
    if config.input_side == 0 {
        return Err(PipelineError::Decode(
            "network input side must be greater than zero".into(),
        ));
    }
    let side = config.input_side as f32;

    let mut boxes: Vec<NormalizedBox> = rows
        .iter()
        .filter(|row| row.confidence > config.confidence_threshold)
        .map(|row| {
            NormalizedBox::from_corners(
                row.x1 / side,
                row.y1 / side,
                row.x2 / side,
                row.y2 / side,
                row.confidence,
            )
        })
        .collect();

    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    for (index, detection) in boxes.iter_mut().enumerate() {
        detection.identifier = format!("tree_{}", index + 1);
    }

    log::debug!(
        "decoded {} of {} rows above threshold {:.2}",
        boxes.len(),
        rows.len(),
        config.confidence_threshold
    );
    Ok(boxes)
}

/// Mark exactly the boxes named in `identifiers` as selected. Order is untouched.
pub fn select_only<S: AsRef<str>>(boxes: &mut [NormalizedBox], identifiers: &[S]) {
    for detection in boxes.iter_mut() {
        detection.selected = identifiers
            .iter()
            .any(|id| id.as_ref() == detection.identifier);
    }
}

pub fn selected_count(boxes: &[NormalizedBox]) -> usize {
    boxes.iter().filter(|b| b.selected).count()
}

/// Build a `[1, N, 6]` tensor from rows produced by an external runner.
pub fn rows_to_tensor(rows: &[[f32; DETECTION_COLUMNS]]) -> Result<Tensor> {
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::from_shape(&[1, rows.len(), DETECTION_COLUMNS], &flat)
        .map_err(|e| PipelineError::Decode(format!("failed to build detection tensor: {e}")))
}

/// Extract the detection rows from the model's output tensor.
fn detection_rows(output: &Tensor) -> Result<ArrayView2<'_, f32>> {
    let (rows, columns) = match output.shape() {
        [rows, columns] => (*rows, *columns),
        [1, rows, columns] => (*rows, *columns),
        other => {
            return Err(PipelineError::InferenceOutput(format!(
                "detection count not readable from output shape {other:?}"
            )));
        }
    };

    if columns != DETECTION_COLUMNS {
        return Err(PipelineError::Decode(format!(
            "detector output must have {DETECTION_COLUMNS} columns per row (got {columns})"
        )));
    }

    let slice = output
        .as_slice::<f32>()
        .map_err(|e| PipelineError::Decode(format!("detector output is not f32: {e}")))?;

    ArrayView2::from_shape((rows, columns), slice)
        .map_err(|_| PipelineError::Decode("detector output data is not contiguous".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(rows: &[[f32; 6]], threshold: f32) -> Vec<NormalizedBox> {
        let tensor = rows_to_tensor(rows).expect("tensor");
        let config = DecodeConfig {
            confidence_threshold: threshold,
            input_side: 640,
        };
        apply_postprocess(&tensor, &config).expect("decode")
    }

    #[test]
    fn keeps_only_confident_rows_and_normalizes() {
        let boxes = decode(
            &[
                [100.0, 100.0, 300.0, 300.0, 0.9, 0.0],
                [50.0, 50.0, 100.0, 100.0, 0.3, 0.0],
            ],
            0.5,
        );
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert!((b.x - 0.15625).abs() < 1e-6);
        assert!((b.y - 0.15625).abs() < 1e-6);
        assert!((b.width - 0.3125).abs() < 1e-6);
        assert!((b.height - 0.3125).abs() < 1e-6);
        assert!((b.x_bottom_right - 0.46875).abs() < 1e-6);
        assert_eq!(b.identifier, "tree_1");
        assert!(b.selected);
    }

    #[test]
    fn ranks_by_confidence_regardless_of_input_order() {
        let boxes = decode(
            &[
                [10.0, 10.0, 20.0, 20.0, 0.6, 0.0],
                [30.0, 30.0, 60.0, 60.0, 0.95, 0.0],
            ],
            0.5,
        );
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence, 0.95);
        assert_eq!(boxes[0].identifier, "tree_1");
        assert_eq!(boxes[1].confidence, 0.6);
        assert_eq!(boxes[1].identifier, "tree_2");
    }

    #[test]
    fn nothing_above_threshold_is_empty_not_error() {
        let boxes = decode(&[[0.0, 0.0, 10.0, 10.0, 0.1, 0.0]; 300], 0.5);
        assert!(boxes.is_empty());
        assert!(decode(&[], 0.5).is_empty());
    }

    #[test]
    fn threshold_is_strict() {
        let boxes = decode(
            &[
                [0.0, 0.0, 10.0, 10.0, 0.5, 0.0],
                [0.0, 0.0, 10.0, 10.0, 0.5 + 1e-4, 0.0],
            ],
            0.5,
        );
        assert_eq!(boxes.len(), 1);
        assert!(boxes[0].confidence > 0.5);
    }

    #[test]
    fn out_of_range_corners_are_clamped_per_field() {
        let boxes = decode(&[[-64.0, 320.0, 960.0, 1280.0, 0.8, 0.0]], 0.5);
        let b = &boxes[0];
        for value in [b.x, b.y, b.width, b.height, b.x_bottom_right, b.y_bottom_right] {
            assert!((0.0..=1.0).contains(&value), "{value} escaped [0, 1]");
        }
        assert_eq!(b.x, 0.0);
        assert_eq!(b.width, 1.0);
        assert_eq!(b.y, 0.5);
        assert_eq!(b.height, 1.0);
        assert_eq!(b.y_bottom_right, 1.0);
    }

    #[test]
    fn identifiers_follow_rank_for_many_rows() {
        let rows: Vec<[f32; 6]> = (0..20)
            .map(|i| {
                let conf = 0.51 + ((i * 7) % 20) as f32 * 0.02;
                [0.0, 0.0, 64.0, 64.0, conf, 0.0]
            })
            .collect();
        let boxes = decode(&rows, 0.5);
        assert_eq!(boxes.len(), 20);
        for (i, pair) in boxes.windows(2).enumerate() {
            assert!(pair[0].confidence >= pair[1].confidence);
            assert_eq!(pair[0].identifier, format!("tree_{}", i + 1));
        }
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let boxes = decode(
            &[
                [0.0, 0.0, 64.0, 64.0, 0.7, 0.0],
                [64.0, 0.0, 128.0, 64.0, 0.7, 0.0],
            ],
            0.5,
        );
        assert_eq!(boxes[0].x, 0.0);
        assert_eq!(boxes[1].x, 0.1);
    }

    #[test]
    fn accepts_two_dimensional_output() {
        let tensor = Tensor::from_shape(&[1, 6], &[0.0f32, 0.0, 320.0, 320.0, 0.9, 0.0])
            .expect("tensor");
        let boxes = apply_postprocess(&tensor, &DecodeConfig::default()).expect("decode");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].width, 0.5);
    }

    #[test]
    fn unreadable_count_is_inference_output_error() {
        let tensor = Tensor::from_shape(&[6], &[0.0f32; 6]).expect("tensor");
        let err = apply_postprocess(&tensor, &DecodeConfig::default()).expect_err("must fail");
        assert!(matches!(err, PipelineError::InferenceOutput(_)));
    }

    #[test]
    fn wrong_column_count_is_decode_error() {
        let tensor = Tensor::from_shape(&[1, 2, 5], &[0.0f32; 10]).expect("tensor");
        let err = apply_postprocess(&tensor, &DecodeConfig::default()).expect_err("must fail");
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn selection_toggles_without_reordering() {
        let mut boxes = decode(
            &[
                [0.0, 0.0, 64.0, 64.0, 0.9, 0.0],
                [0.0, 0.0, 64.0, 64.0, 0.8, 0.0],
                [0.0, 0.0, 64.0, 64.0, 0.7, 0.0],
            ],
            0.5,
        );
        assert_eq!(selected_count(&boxes), 3);

        select_only(&mut boxes, &["tree_1", "tree_3"]);
        assert_eq!(selected_count(&boxes), 2);
        assert!(!boxes[1].selected);
        let ids: Vec<&str> = boxes.iter().map(|b| b.identifier.as_str()).collect();
        assert_eq!(ids, ["tree_1", "tree_2", "tree_3"]);
    }
}
