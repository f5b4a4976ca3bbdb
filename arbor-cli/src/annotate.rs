//! Image annotation functionality for drawing detections.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use arbor_core::{NormalizedBox, clamped_pixel_rect};
use image::Rgba;
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

/// Draw detections on an image and save it to a directory.
///
/// Selected boxes are drawn in green, deselected ones in grey.
pub fn annotate_image(
    image_path: &Path,
    boxes: &[NormalizedBox],
    output_dir: &Path,
) -> Result<std::path::PathBuf> {
    let mut image = image::open(image_path)
        .with_context(|| format!("failed to open image {}", image_path.display()))?
        .to_rgba8();
    let (img_w, img_h) = image.dimensions();

    if img_w == 0 || img_h == 0 {
        anyhow::bail!(
            "cannot annotate image with zero dimensions: {}",
            image_path.display()
        );
    }

    let selected_color = Rgba([40, 220, 60, 255]);
    let deselected_color = Rgba([160, 160, 160, 255]);

    for detection in boxes {
        let Some(rect) = rect_from_box(detection, img_w, img_h) else {
            continue;
        };
        let color = if detection.selected {
            selected_color
        } else {
            deselected_color
        };
        draw_hollow_rect_mut(&mut image, rect, color);
    }

    let file_name = image_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("frame.png"));
    let output_path = output_dir.join(file_name);

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    image
        .save(&output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))?;

    Ok(output_path)
}

/// Map a normalized box onto the image's pixel grid with the crop clamping rules.
fn rect_from_box(detection: &NormalizedBox, img_w: u32, img_h: u32) -> Option<Rect> {
    let pixel = clamped_pixel_rect(detection.rect(), img_w, img_h)?;
    Some(Rect::at(pixel.x as i32, pixel.y as i32).of_size(pixel.width, pixel.height))
}
