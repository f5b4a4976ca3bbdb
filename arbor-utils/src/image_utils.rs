use image::{DynamicImage, RgbImage, imageops::FilterType};
use ndarray::Array3;

/// Maximum value of an 8-bit colour sample.
pub const CHANNEL_MAX: f32 = 255.0;

/// Resize an image to exactly `width` x `height`, stretching instead of letterboxing.
///
/// Any alpha channel is discarded by the RGB conversion.
pub fn resize_image(image: &DynamicImage, width: u32, height: u32, filter: FilterType) -> RgbImage {
    image.resize_exact(width, height, filter).to_rgb8()
}

/// Repack an RGB image into channel-major planes (R, then G, then B) scaled into `[0, 1]`.
///
/// Each plane is row-major, so the value for channel `c` at pixel `(x, y)` lives at
/// `c * height * width + y * width + x` once the array is flattened.
pub fn rgb_to_chw_normalized(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        array[(0, yi, xi)] = pixel[0] as f32 / CHANNEL_MAX;
        array[(1, yi, xi)] = pixel[1] as f32 / CHANNEL_MAX;
        array[(2, yi, xi)] = pixel[2] as f32 / CHANNEL_MAX;
    }
    array
}
