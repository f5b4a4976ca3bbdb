//! Common helpers shared across arbor crates.

/// Application configuration and settings management.
pub mod config;
/// Image loading, resizing, and tensor repacking.
pub mod image_utils;
/// Crop image encoding and writing.
pub mod output;
/// Scoped timing logs for pipeline stages.
pub mod telemetry;

use std::path::Path;

use anyhow::Result;
use log::LevelFilter;

pub use image_utils::{CHANNEL_MAX, resize_image, rgb_to_chw_normalized};
pub use output::{CropFormat, OutputOptions, encode_image, save_dynamic_image};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, telemetry_allows, telemetry_enabled,
    timing_guard,
};

/// Initialize logging once for the CLI and tests.
///
/// `RUST_LOG` takes precedence over `default_filter` when set.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(telemetry::TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}

/// Validate that a path exists and resolve it to an absolute path.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<std::path::PathBuf> {
    let path = path.as_ref();
    anyhow::ensure!(path.exists(), "path does not exist: {}", path.display());
    Ok(path.canonicalize()?)
}
