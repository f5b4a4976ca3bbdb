//! Tree detector construction for the CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use arbor_core::{InferenceBackend, ReplayBackend, TreeDetector, TreeModel};
use arbor_utils::{config::AppSettings, normalize_path};
use log::info;

use crate::{args::SourceArgs, config, input::load_raw_rows};

pub type CliDetector = TreeDetector<Box<dyn InferenceBackend>>;

/// Build a detector over the ONNX model, or over replayed rows when `--raw` is given.
pub fn build_cli_detector(settings: &AppSettings, source: &SourceArgs) -> Result<CliDetector> {
    let preprocess = config::preprocess_config(settings);
    let decode = config::decode_config(settings, source.threshold);

    let backend: Box<dyn InferenceBackend> = if let Some(raw) = source.raw.as_ref() {
        let rows = load_raw_rows(raw)?;
        info!("Replaying {} raw detection row(s) from {}", rows.len(), raw.display());
        Box::new(ReplayBackend::from_rows(&rows)?)
    } else {
        let model_path = source
            .model
            .clone()
            .or_else(|| settings.model_path.as_ref().map(PathBuf::from))
            .context("no model path given and none configured")?;
        let model_path = normalize_path(&model_path)?;
        info!(
            "Loading tree model from {} at resolution {}x{}",
            model_path.display(),
            preprocess.input_side,
            preprocess.input_side
        );
        Box::new(TreeModel::load(&model_path, preprocess.input_side)?)
    };

    Ok(TreeDetector::new(backend, preprocess, decode))
}
