use std::path::Path;

use arbor_utils::timing_guard;
use image::DynamicImage;
use tract_onnx::prelude::Tensor;

use crate::{
    error::Result,
    geometry::NormalizedBox,
    model::InferenceBackend,
    postprocess::{DecodeConfig, apply_postprocess},
    preprocess::{PreprocessConfig, PreprocessedTensor, preprocess_dynamic_image, preprocess_image},
};

/// Result of one detection run on a photo.
#[derive(Debug, Clone)]
pub struct DetectionRun {
    /// Boxes ranked by descending confidence, named `tree_1..` in that order.
    pub boxes: Vec<NormalizedBox>,
    /// Dimensions of the source photo.
    pub original_size: (u32, u32),
}

/// Couples an inference backend with preprocessing and decoding settings.
///
/// The backend is built once by the caller and injected here.
#[derive(Debug)]
pub struct TreeDetector<B> {
    backend: B,
    preprocess: PreprocessConfig,
    decode: DecodeConfig,
}

impl<B: InferenceBackend> TreeDetector<B> {
    /// Both configs must agree on the input side; `decode.input_side` is taken from `preprocess`.
    pub fn new(backend: B, preprocess: PreprocessConfig, decode: DecodeConfig) -> Self {
        Self {
            backend,
            decode: DecodeConfig {
                input_side: preprocess.input_side,
                ..decode
            },
            preprocess,
        }
    }

    /// Run detection on an image file path.
    pub fn detect_path<P: AsRef<Path>>(&self, path: P) -> Result<DetectionRun> {
        let _guard = timing_guard("arbor_core::detect_path", log::Level::Debug);
        let prep = preprocess_image(path, &self.preprocess)?;
        self.run_preprocessed(prep)
    }

    /// Run detection on an in-memory image.
    pub fn detect_image(&self, image: &DynamicImage) -> Result<DetectionRun> {
        let _guard = timing_guard("arbor_core::detect_image", log::Level::Debug);
        let prep = preprocess_dynamic_image(image, &self.preprocess)?;
        self.run_preprocessed(prep)
    }

    pub fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    pub fn decode_config(&self) -> &DecodeConfig {
        &self.decode
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn run_preprocessed(&self, prep: PreprocessedTensor) -> Result<DetectionRun> {
        let raw = {
            let _guard = timing_guard("arbor_core::inference", log::Level::Debug);
            self.backend.run(&prep)?
        };
        let boxes = self.decode_raw(&raw)?;
        Ok(DetectionRun {
            boxes,
            original_size: prep.original_size,
        })
    }

    /// Decode a raw output tensor with this detector's settings.
    pub fn decode_raw(&self, raw: &Tensor) -> Result<Vec<NormalizedBox>> {
        apply_postprocess(raw, &self.decode)
    }
}
