//! Preprocessing utilities for preparing photos for tree detection.
//!
//! Photos are stretched (not letterboxed) to the square network input and repacked into
//! channel-major R, G, B planes scaled into `[0, 1]`. The decoder divides by the same side, so
//! normalized detections stay relative to the original photo on both axes.

use std::{borrow::Cow, path::Path};

use arbor_utils::{
    config::{InputDimensions, ResizeQuality},
    resize_image, rgb_to_chw_normalized, timing_guard,
};
use image::{DynamicImage, GenericImageView, RgbImage, imageops::FilterType};

use crate::error::{PipelineError, Result};

/// Number of colour planes fed to the network.
pub const CHANNELS: usize = 3;

/// Configuration for preprocessing a photo before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// Side of the square network input, in pixels.
    pub input_side: u32,
    /// Resize filter preference.
    pub resize_quality: ResizeQuality,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        InputDimensions::default().into()
    }
}

impl PreprocessConfig {
    fn resize_filter(&self) -> FilterType {
        match self.resize_quality {
            ResizeQuality::Quality => FilterType::Triangle,
            ResizeQuality::Speed => FilterType::Nearest,
        }
    }
}

impl From<InputDimensions> for PreprocessConfig {
    fn from(dimensions: InputDimensions) -> Self {
        PreprocessConfig {
            input_side: dimensions.side,
            resize_quality: dimensions.resize_quality,
        }
    }
}

impl From<&InputDimensions> for PreprocessConfig {
    fn from(dimensions: &InputDimensions) -> Self {
        (*dimensions).into()
    }
}

/// Flat channel-major input buffer plus its declared `[1, channels, side, side]` shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
    /// Dimensions of the source photo before resizing.
    pub original_size: (u32, u32),
}

impl PreprocessedTensor {
    pub fn side(&self) -> usize {
        self.shape[3]
    }
}

/// Abstraction over preprocessing backends.
pub trait Preprocessor: Send + Sync + std::fmt::Debug {
    fn preprocess(
        &self,
        image: &DynamicImage,
        config: &PreprocessConfig,
    ) -> Result<PreprocessedTensor>;
}

/// Default CPU implementation backed by `image` + ndarray.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuPreprocessor;

impl Preprocessor for CpuPreprocessor {
    fn preprocess(
        &self,
        image: &DynamicImage,
        config: &PreprocessConfig,
    ) -> Result<PreprocessedTensor> {
        cpu_preprocess(image, config)
    }
}

/// Read a photo from disk and preprocess it.
pub fn preprocess_image<P: AsRef<Path>>(
    path: P,
    config: &PreprocessConfig,
) -> Result<PreprocessedTensor> {
    preprocess_image_with(&CpuPreprocessor, path, config)
}

/// Read a photo from disk and preprocess it with a specific backend.
pub fn preprocess_image_with<P, T>(
    preprocessor: &T,
    path: P,
    config: &PreprocessConfig,
) -> Result<PreprocessedTensor>
where
    P: AsRef<Path>,
    T: Preprocessor + ?Sized,
{
    let _guard = timing_guard("arbor_core::preprocess_image", log::Level::Debug);
    let path_ref = path.as_ref();
    let image = image::open(path_ref).map_err(|e| PipelineError::from_image(path_ref, e))?;
    preprocessor.preprocess(&image, config)
}

/// Preprocess an in-memory photo.
pub fn preprocess_dynamic_image(
    image: &DynamicImage,
    config: &PreprocessConfig,
) -> Result<PreprocessedTensor> {
    CpuPreprocessor.preprocess(image, config)
}

fn cpu_preprocess(image: &DynamicImage, config: &PreprocessConfig) -> Result<PreprocessedTensor> {
    let _guard = timing_guard("arbor_core::preprocess_dynamic_image", log::Level::Trace);
    let side = config.input_side;
    if side == 0 {
        return Err(PipelineError::Decode(
            "network input side must be greater than zero".into(),
        ));
    }

    let (orig_w, orig_h) = image.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return Err(PipelineError::Decode(
            "source image dimensions must be greater than zero".into(),
        ));
    }

    let resized: Cow<'_, RgbImage> = if orig_w == side && orig_h == side {
        match image.as_rgb8() {
            Some(rgb) => Cow::Borrowed(rgb),
            None => Cow::Owned(image.to_rgb8()),
        }
    } else {
        Cow::Owned(resize_image(image, side, side, config.resize_filter()))
    };

    if resized.dimensions() != (side, side) {
        let (w, h) = resized.dimensions();
        return Err(PipelineError::Decode(format!(
            "resize produced {w}x{h}, expected {side}x{side}"
        )));
    }

    let chw = rgb_to_chw_normalized(&resized);
    let (data, offset) = chw.into_raw_vec_and_offset();
    if offset.is_some_and(|o| o != 0) {
        return Err(PipelineError::Decode(
            "channel-major buffer is not contiguous".into(),
        ));
    }

    let side = side as usize;
    Ok(PreprocessedTensor {
        data,
        shape: [1, CHANNELS, side, side],
        original_size: (orig_w, orig_h),
    })
}
