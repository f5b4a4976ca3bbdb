//! Encoding and writing of derived crop images.
//!
//! Crops are encoded fully in memory and written through a sibling `.part` file that is renamed
//! into place, so a destination path either holds a complete image or does not exist.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{
    DynamicImage, ExtendedColorType, ImageEncoder,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
        webp::WebPEncoder,
    },
};
use log::debug;

use crate::config::StorageSettings;

/// Image formats supported for persisted crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropFormat {
    Png,
    #[default]
    Jpeg,
    Webp,
}

impl CropFormat {
    /// File extension written for this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

impl std::str::FromStr for CropFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(format!("unknown crop format '{other}'")),
        }
    }
}

/// Encoding options for crop images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: CropFormat,
    pub jpeg_quality: u8,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: CropFormat::Jpeg,
            jpeg_quality: 90,
        }
    }
}

impl OutputOptions {
    /// Build options from persisted storage settings, falling back to JPEG on unknown formats.
    pub fn from_storage_settings(settings: &StorageSettings) -> Self {
        Self {
            format: settings.crop_format.parse().unwrap_or_default(),
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
        }
    }
}

/// Encode `image` into an in-memory buffer.
pub fn encode_image(image: &DynamicImage, options: &OutputOptions) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let result = match options.format {
        CropFormat::Png => {
            let rgba = image.to_rgba8();
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Default, FilterType::Adaptive)
                .write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    ExtendedColorType::Rgba8,
                )
        }
        CropFormat::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, options.jpeg_quality).write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )
        }
        CropFormat::Webp => {
            let rgba = image.to_rgba8();
            WebPEncoder::new_lossless(&mut buffer).write_image(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )
        }
    };
    result.map_err(io::Error::other)?;
    Ok(buffer)
}

/// Encode and write `image` to `destination`, creating parent directories as needed.
pub fn save_dynamic_image(
    image: &DynamicImage,
    destination: &Path,
    options: &OutputOptions,
) -> io::Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let encoded = encode_image(image, options)?;
    debug!(
        "Writing {:?} crop ({} bytes) to {}",
        options.format,
        encoded.len(),
        destination.display()
    );

    let partial = partial_path(destination);
    let written = write_bytes(&partial, &encoded).and_then(|_| fs::rename(&partial, destination));
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(bytes)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn parses_format_names() {
        assert_eq!("PNG".parse::<CropFormat>(), Ok(CropFormat::Png));
        assert_eq!("jpg".parse::<CropFormat>(), Ok(CropFormat::Jpeg));
        assert_eq!("webp".parse::<CropFormat>(), Ok(CropFormat::Webp));
        assert!("tiff".parse::<CropFormat>().is_err());
    }

    #[test]
    fn saves_into_new_directory_without_leftovers() {
        let dir = tempdir().expect("tempdir");
        let destination = dir.path().join("crops/tree_1.png");
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])));
        let options = OutputOptions {
            format: CropFormat::Png,
            ..Default::default()
        };

        save_dynamic_image(&image, &destination, &options).expect("save crop");

        assert!(destination.exists());
        assert!(!partial_path(&destination).exists());
        let decoded = image::open(&destination).expect("decode crop");
        assert_eq!(decoded.dimensions(), (6, 4));
    }

    #[test]
    fn storage_settings_drive_options() {
        let settings = StorageSettings {
            crop_format: "bogus".into(),
            jpeg_quality: 0,
            ..StorageSettings::default()
        };
        let options = OutputOptions::from_storage_settings(&settings);
        assert_eq!(options.format, CropFormat::Jpeg);
        assert_eq!(options.jpeg_quality, 1);
    }
}
