//! Command-line argument definitions for arbor-cli.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Detect street trees in photos, crop them, and keep an inventory of trees and defects.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional settings JSON. Defaults to `config/arbor.json` when present, otherwise built-in parameters.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the SQLite database path.
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Override the directory receiving crop images.
    #[arg(long, global = true, value_name = "DIR")]
    pub crop_dir: Option<PathBuf>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, global = true, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Detect trees in an image or a directory of images.
    Detect(DetectArgs),
    /// Detect trees in one photo and save the selected ones as records.
    Save(SaveArgs),
    /// Replace a tree's defects with those in a defect service response.
    Defects(DefectsArgs),
    /// Store the taxon from a classification service response.
    Classify(ClassifyArgs),
    /// Edit a tree's description or attach auxiliary images.
    Edit(EditArgs),
    /// Delete a tree and its defects.
    Delete(DeleteArgs),
    /// Export the inventory report as JSON.
    Export(ExportArgs),
}

/// Where raw detections come from.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Path to the tree detection ONNX model (defaults to settings file).
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// JSON file of raw detector rows `[[x1, y1, x2, y2, confidence, class_id], ...]`
    /// produced by an external runner, used instead of the model.
    #[arg(long, conflicts_with = "model")]
    pub raw: Option<PathBuf>,

    /// Override tree confidence threshold.
    #[arg(long)]
    pub threshold: Option<f32>,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Path to an image file or a directory containing images.
    #[arg(short, long)]
    pub input: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Write detections to a JSON file instead of stdout.
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Directory to write annotated images with bounding boxes overlaid.
    #[arg(long)]
    pub annotate: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SaveArgs {
    /// Photo to detect trees in.
    #[arg(short, long)]
    pub input: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Comma-separated identifiers to keep (e.g. `tree_1,tree_3`). All detections by default.
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Description applied to every saved tree.
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Debug, Args)]
pub struct DefectsArgs {
    /// Tree record id.
    #[arg(long)]
    pub tree: i64,

    /// Image the defect service analysed. Defaults to the tree's crop, then its source photo.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Defect service response JSON.
    #[arg(long)]
    pub response: PathBuf,

    /// Override defect confidence threshold.
    #[arg(long)]
    pub threshold: Option<f32>,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Tree record id.
    #[arg(long)]
    pub tree: i64,

    /// Classification service response JSON.
    #[arg(long)]
    pub response: PathBuf,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Tree record id.
    #[arg(long)]
    pub tree: i64,

    /// New description.
    #[arg(long)]
    pub description: Option<String>,

    /// Auxiliary image to attach (repeatable).
    #[arg(long = "add-image", value_name = "PATH")]
    pub add_image: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Tree record id.
    #[arg(long)]
    pub tree: i64,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Write the report to a file instead of stdout.
    #[arg(long)]
    pub json: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn select_splits_on_commas() {
        let cli = Cli::parse_from([
            "arbor-cli",
            "save",
            "--input",
            "photo.jpg",
            "--raw",
            "rows.json",
            "--select",
            "tree_1,tree_3",
        ]);
        let Command::Save(args) = cli.command else {
            panic!("expected save");
        };
        assert_eq!(args.select, ["tree_1", "tree_3"]);
        assert!(args.source.model.is_none());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["arbor-cli", "export", "--database", "inv.db", "--telemetry"]);
        assert!(cli.telemetry);
        assert_eq!(cli.database.as_deref(), Some(std::path::Path::new("inv.db")));
    }

    #[test]
    fn model_and_raw_conflict() {
        let result = Cli::try_parse_from([
            "arbor-cli", "detect", "--input", "a.jpg", "--model", "m.onnx", "--raw", "r.json",
        ]);
        assert!(result.is_err());
    }
}
