//! Configuration loading and CLI override logic.

use std::path::PathBuf;

use anyhow::{Context, Result};
use arbor_core::{CropTarget, DecodeConfig, PreprocessConfig};
use arbor_utils::{
    OutputOptions,
    config::{AppSettings, default_settings_path},
    normalize_path,
};
use log::info;

use crate::args::Cli;

/// Load application settings from a file or use defaults.
pub fn load_settings(config_path: Option<&PathBuf>) -> Result<AppSettings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        let settings = AppSettings::load_from_path(&resolved)?;
        info!("Loaded settings from {}", resolved.display());
        Ok(settings)
    } else {
        let default_path = default_settings_path();
        if default_path.exists() {
            let settings = AppSettings::load_from_path(&default_path).with_context(|| {
                format!(
                    "failed to load default settings from {}",
                    default_path.display()
                )
            })?;
            info!("Loaded settings from {}", default_path.display());
            Ok(settings)
        } else {
            Ok(AppSettings::default())
        }
    }
}

/// Apply global command-line flags to loaded or default settings.
pub fn apply_cli_overrides(settings: &mut AppSettings, cli: &Cli) {
    if let Some(path) = cli.database.as_ref() {
        settings.storage.database_path = path.to_string_lossy().into_owned();
    }
    if let Some(dir) = cli.crop_dir.as_ref() {
        settings.storage.crop_dir = dir.to_string_lossy().into_owned();
    }

    if cli.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = cli.telemetry_level.as_ref() {
        let normalized = level.trim();
        if !normalized.is_empty() {
            let lower = normalized.to_ascii_lowercase();
            settings.telemetry.level = lower.clone();
            if lower == "off" {
                settings.telemetry.enabled = false;
            }
        }
    }
}

pub fn preprocess_config(settings: &AppSettings) -> PreprocessConfig {
    settings.input.into()
}

/// Decode settings, with the tree threshold optionally overridden.
pub fn decode_config(settings: &AppSettings, threshold: Option<f32>) -> DecodeConfig {
    let mut config = DecodeConfig::from(&settings.detection);
    config.input_side = settings.input.side;
    if let Some(threshold) = threshold {
        config.confidence_threshold = threshold;
    }
    config
}

pub fn crop_target(settings: &AppSettings) -> CropTarget {
    CropTarget::new(
        &settings.storage.crop_dir,
        OutputOptions::from_storage_settings(&settings.storage),
    )
}
