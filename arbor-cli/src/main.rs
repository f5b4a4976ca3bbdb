mod annotate;
mod args;
mod config;
mod detector;
mod input;
mod types;

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use arbor_core::{
    ClassificationResponse, DefectResponse, RecordStore, TreeEntity, assemble, assemble_defects,
    build_report, filter_defects, select_only, selected_count,
};
use arbor_utils::{config::AppSettings, configure_telemetry, init_logging, normalize_path};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use crate::{
    annotate::annotate_image,
    args::{
        ClassifyArgs, Cli, Command, DefectsArgs, DeleteArgs, DetectArgs, EditArgs, ExportArgs,
        SaveArgs,
    },
    config::{apply_cli_overrides, crop_target, load_settings},
    detector::build_cli_detector,
    input::{collect_images, read_text},
    types::{DetectionRecord, ImageDetections},
};

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_ref())?;
    apply_cli_overrides(&mut settings, &cli);
    configure_telemetry(
        settings.telemetry.enabled,
        settings.telemetry.level_filter(),
    );

    match &cli.command {
        Command::Detect(args) => run_detect(&settings, args),
        Command::Save(args) => run_save(&settings, args),
        Command::Defects(args) => run_defects(&settings, args),
        Command::Classify(args) => run_classify(&settings, args),
        Command::Edit(args) => run_edit(&settings, args),
        Command::Delete(args) => run_delete(&settings, args),
        Command::Export(args) => run_export(&settings, args),
    }
}

fn run_detect(settings: &AppSettings, args: &DetectArgs) -> Result<()> {
    let input_path = normalize_path(&args.input)?;
    let annotate_dir = if let Some(dir) = args.annotate.as_ref() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create annotation directory {}", dir.display()))?;
        Some(normalize_path(dir)?)
    } else {
        None
    };

    let detector = build_cli_detector(settings, &args.source)?;
    let images = collect_images(&input_path)?;
    if images.is_empty() {
        anyhow::bail!(
            "no images found at {} (supported extensions: jpg, jpeg, png, bmp, webp)",
            input_path.display()
        );
    }

    info!("Processing {} image(s)...", images.len());
    let mut results = Vec::with_capacity(images.len());
    for image_path in images {
        match detector.detect_path(&image_path) {
            Ok(run) => {
                info!("{} -> {} tree(s)", image_path.display(), run.boxes.len());
                let annotated = annotate_dir.as_ref().and_then(|dir| {
                    match annotate_image(&image_path, &run.boxes, dir) {
                        Ok(path) => {
                            info!("Annotated image saved to {}", path.display());
                            Some(path.display().to_string())
                        }
                        Err(err) => {
                            warn!("Failed to annotate {}: {err}", image_path.display());
                            None
                        }
                    }
                });

                results.push(ImageDetections {
                    image: image_path.display().to_string(),
                    width: run.original_size.0,
                    height: run.original_size.1,
                    detections: run.boxes.iter().map(DetectionRecord::from).collect(),
                    annotated,
                });
            }
            Err(err) => {
                warn!("Detection failed for {}: {err}", image_path.display());
            }
        }
    }

    if results.is_empty() {
        anyhow::bail!("all detections failed; cannot produce output");
    }
    write_json(args.json.as_deref(), &results)
}

fn run_save(settings: &AppSettings, args: &SaveArgs) -> Result<()> {
    let input_path = normalize_path(&args.input)?;
    let detector = build_cli_detector(settings, &args.source)?;
    let mut run = detector
        .detect_path(&input_path)
        .with_context(|| format!("detection failed for {}", input_path.display()))?;

    if !args.select.is_empty() {
        for id in &args.select {
            if !run.boxes.iter().any(|b| &b.identifier == id) {
                warn!("Unknown detection identifier '{id}' ignored");
            }
        }
        select_only(&mut run.boxes, args.select.as_slice());
    }
    info!(
        "{} of {} detection(s) selected",
        selected_count(&run.boxes),
        run.boxes.len()
    );

    let mut trees = assemble(&input_path, &run.boxes, &crop_target(settings), Utc::now())?;
    if let Some(description) = args.description.as_ref() {
        for tree in &mut trees {
            tree.description = description.clone();
        }
    }

    let mut store = open_store(settings)?;
    let saved = store.insert_trees(&trees)?;
    let missing_crops = saved.iter().filter(|t| t.crop_path.is_none()).count();
    if missing_crops > 0 {
        warn!("{missing_crops} tree(s) saved without a crop image");
    }
    write_json(None, &saved)
}

fn run_defects(settings: &AppSettings, args: &DefectsArgs) -> Result<()> {
    let mut store = open_store(settings)?;
    let tree = require_tree(&store, args.tree)?;

    let response = DefectResponse::from_json(&read_text(&args.response)?)
        .with_context(|| format!("invalid defect response {}", args.response.display()))?;
    let threshold = args
        .threshold
        .unwrap_or(settings.defects.confidence_threshold);
    let kept = filter_defects(&response, threshold);
    info!(
        "{} of {} defect prediction(s) above {threshold:.2}",
        kept.len(),
        response.predictions.len()
    );

    let image_path = defect_image_path(&tree, args.image.as_deref());
    let image = match image::open(&image_path) {
        Ok(image) => Some(image),
        Err(err) => {
            warn!(
                "Cannot read {} ({err}); defects will be saved without crops",
                image_path.display()
            );
            None
        }
    };

    let defects = assemble_defects(
        args.tree,
        &image_path,
        image.as_ref(),
        &kept,
        &crop_target(settings),
        Utc::now(),
    );
    let saved = store.replace_defects(args.tree, &defects)?;
    write_json(None, &saved)
}

fn run_classify(settings: &AppSettings, args: &ClassifyArgs) -> Result<()> {
    let store = open_store(settings)?;
    require_tree(&store, args.tree)?;
    let response = ClassificationResponse::from_json(&read_text(&args.response)?)
        .with_context(|| format!("invalid classification response {}", args.response.display()))?;

    store.update_taxon(args.tree, Some(response.label.as_str()))?;
    info!("Tree {} classified as {}", args.tree, response.label);
    write_json(None, &require_tree(&store, args.tree)?)
}

fn run_edit(settings: &AppSettings, args: &EditArgs) -> Result<()> {
    let store = open_store(settings)?;
    require_tree(&store, args.tree)?;

    if let Some(description) = args.description.as_ref() {
        store.update_description(args.tree, description)?;
    }
    for image in &args.add_image {
        store.add_auxiliary_image(args.tree, &image.to_string_lossy())?;
    }
    write_json(None, &require_tree(&store, args.tree)?)
}

fn run_delete(settings: &AppSettings, args: &DeleteArgs) -> Result<()> {
    let store = open_store(settings)?;
    if !store.delete_tree(args.tree)? {
        anyhow::bail!("tree {} not found", args.tree);
    }
    info!("Deleted tree {} and its defects", args.tree);
    Ok(())
}

fn run_export(settings: &AppSettings, args: &ExportArgs) -> Result<()> {
    let store = open_store(settings)?;
    let report = build_report(&store)?;
    info!(
        "Exporting {} tree(s) with {} defect(s)",
        report.tree_count, report.defect_count
    );
    write_json(args.json.as_deref(), &report)
}

fn open_store(settings: &AppSettings) -> Result<RecordStore> {
    let path = &settings.storage.database_path;
    RecordStore::open(path).with_context(|| format!("failed to open record store {path}"))
}

fn require_tree(store: &RecordStore, id: i64) -> Result<TreeEntity> {
    store
        .tree(id)?
        .with_context(|| format!("tree {id} not found"))
}

fn defect_image_path(tree: &TreeEntity, explicit: Option<&Path>) -> PathBuf {
    match (explicit, tree.crop_path.as_ref()) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(crop)) => PathBuf::from(crop),
        (None, None) => PathBuf::from(&tree.image_path),
    }
}

/// Pretty-print `value` to `path`, or to stdout when no path is given.
fn write_json<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<()> {
    if let Some(json_path) = path {
        if let Some(dir) = json_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        let file = File::create(json_path)
            .with_context(|| format!("failed to create {}", json_path.display()))?;
        serde_json::to_writer_pretty(file, value)
            .with_context(|| format!("failed to write JSON to {}", json_path.display()))?;
        info!("Wrote {}", json_path.display());
    } else {
        let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
        println!("{json}");
    }
    Ok(())
}
