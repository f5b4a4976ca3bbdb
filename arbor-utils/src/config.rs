//! Shared configuration types consumed across the arbor workspace.
//!
//! Settings are persisted as JSON. Every section uses `#[serde(default)]` so partially written
//! files load with the built-in defaults filled in.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default tree detection confidence threshold.
pub const DEFAULT_TREE_THRESHOLD: f32 = 0.5;
/// Default defect detection confidence threshold.
pub const DEFAULT_DEFECT_THRESHOLD: f32 = 0.25;
/// Default square input side of the detection network.
pub const DEFAULT_INPUT_SIDE: u32 = 640;

/// Tree detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Detections must score strictly above this value to be kept.
    pub confidence_threshold: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_TREE_THRESHOLD,
        }
    }
}

/// Defect detection parameters applied to responses from the defect service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefectSettings {
    /// Defect predictions must score strictly above this value to be kept.
    pub confidence_threshold: f32,
}

impl Default for DefectSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_DEFECT_THRESHOLD,
        }
    }
}

/// Resize filter preference used when stretching photos to the network input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeQuality {
    /// Triangle filter.
    #[default]
    Quality,
    /// Nearest-neighbour filter.
    Speed,
}

impl fmt::Display for ResizeQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResizeQuality::Quality => "quality",
            ResizeQuality::Speed => "speed",
        })
    }
}

impl FromStr for ResizeQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(ResizeQuality::Quality),
            "speed" => Ok(ResizeQuality::Speed),
            other => Err(format!(
                "invalid resize quality '{other}'; expected 'quality' or 'speed'"
            )),
        }
    }
}

/// Network input resolution. The model takes a square `side` x `side` RGB tensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputDimensions {
    pub side: u32,
    pub resize_quality: ResizeQuality,
}

impl Default for InputDimensions {
    fn default() -> Self {
        Self {
            side: DEFAULT_INPUT_SIDE,
            resize_quality: ResizeQuality::Quality,
        }
    }
}

/// Where records and derived crops are stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database holding tree and defect records.
    pub database_path: String,
    /// Directory receiving crop images.
    pub crop_dir: String,
    /// Crop encoding: "jpeg", "png", or "webp".
    pub crop_format: String,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "data/arbor.db".to_string(),
            crop_dir: "data/crops".to_string(),
            crop_format: "jpeg".to_string(),
            jpeg_quality: 90,
        }
    }
}

/// Settings controlling optional stage timing logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Path to the tree detection ONNX model.
    pub model_path: Option<String>,
    pub input: InputDimensions,
    pub detection: DetectionSettings,
    pub defects: DefectSettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_path: Some("models/tree_detection_640.onnx".into()),
            input: InputDimensions::default(),
            detection: DetectionSettings::default(),
            defects: DefectSettings::default(),
            storage: StorageSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file. A missing `model_path` falls back to the default.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;

        if settings.model_path.is_none() {
            settings.model_path = AppSettings::default().model_path;
        }
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

/// Returns the default settings location (`config/arbor.json` under the working directory).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/arbor.json"))
        .unwrap_or_else(|_| PathBuf::from("config/arbor.json"))
}
