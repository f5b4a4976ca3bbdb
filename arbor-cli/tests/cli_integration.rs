mod common;

use common::{Workspace, assert_success, files_in, find_model_path};
use image::GenericImageView;

const ROWS: &str = "[
    [400, 100, 600, 500, 0.81, 0],
    [64, 128, 320, 640, 0.92, 0],
    [10, 10, 20, 20, 0.4, 0]
]";

const DEFECTS: &str = r#"{
    "detections": [
        {"key": "d1", "label": "crack", "confidence": 0.91, "x1": 0.1, "y1": 0.2, "x2": 0.5, "y2": 0.6},
        {"key": "d2", "label": "hollow", "confidence": 0.2, "x1": 0.5, "y1": 0.5, "x2": 0.7, "y2": 0.9}
    ]
}"#;

fn saved_tree_id(ws: &Workspace, select: &str) -> i64 {
    let photo = ws.photo("street.png", 800, 600);
    let rows = ws.write("rows.json", ROWS);
    let saved = ws.run_json(&[
        "save",
        "--input",
        photo.to_str().expect("utf-8 path"),
        "--raw",
        rows.to_str().expect("utf-8 path"),
        "--select",
        select,
    ]);
    saved[0]["id"].as_i64().expect("tree id")
}

#[test]
fn detect_ranks_raw_rows_and_annotates() {
    let ws = Workspace::new();
    let photo = ws.photo("street.png", 800, 600);
    let rows = ws.write("rows.json", ROWS);
    let annotated = ws.path("annotated");

    let report = ws.run_json(&[
        "detect",
        "--input",
        photo.to_str().expect("utf-8 path"),
        "--raw",
        rows.to_str().expect("utf-8 path"),
        "--annotate",
        annotated.to_str().expect("utf-8 path"),
    ]);

    let image = &report[0];
    assert_eq!(image["width"], 800);
    assert_eq!(image["height"], 600);
    let detections = image["detections"].as_array().expect("detections");
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0]["identifier"], "tree_1");
    assert!((detections[0]["confidence"].as_f64().expect("conf") - 0.92).abs() < 1e-6);
    assert_eq!(detections[1]["identifier"], "tree_2");
    assert_eq!(detections[1]["bbox"][0], 0.625);
    assert!(image["annotated"].is_string());
    assert_eq!(files_in(&annotated).len(), 1);
}

#[test]
fn threshold_flag_filters_detections() {
    let ws = Workspace::new();
    let photo = ws.photo("street.png", 320, 240);
    let rows = ws.write("rows.json", ROWS);

    let report = ws.run_json(&[
        "detect",
        "--input",
        photo.to_str().expect("utf-8 path"),
        "--raw",
        rows.to_str().expect("utf-8 path"),
        "--threshold",
        "0.9",
    ]);
    assert_eq!(report[0]["detections"].as_array().expect("detections").len(), 1);
}

#[test]
fn save_crops_selected_trees_only() {
    let ws = Workspace::new();
    let id = saved_tree_id(&ws, "tree_2");

    let export = ws.run_json(&["export"]);
    assert_eq!(export["tree_count"], 1);
    let tree = &export["trees"][0];
    assert_eq!(tree["id"], id);
    assert_eq!(tree["description"], "");
    assert_eq!(tree["auxiliary_images"].as_array().expect("aux").len(), 0);

    let crop = tree["crop_path"].as_str().expect("crop path");
    let crop = image::open(crop).expect("crop decodes");
    // tree_2 spans x 0.625..0.9375 and y 0.15625..0.78125 of an 800x600 photo
    assert_eq!(crop.dimensions(), (250, 375));
    assert_eq!(files_in(&ws.crop_dir()).len(), 1);
}

#[test]
fn saving_nothing_selected_fails_before_writing() {
    let ws = Workspace::new();
    let photo = ws.photo("street.png", 200, 200);
    let rows = ws.write("rows.json", ROWS);

    let output = ws.run(&[
        "save",
        "--input",
        photo.to_str().expect("utf-8 path"),
        "--raw",
        rows.to_str().expect("utf-8 path"),
        "--select",
        "tree_9",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("at least one detection must be selected"), "{stderr}");
    assert!(!ws.path("arbor.db").exists());
    assert!(files_in(&ws.crop_dir()).is_empty());
}

#[test]
fn defects_replace_previous_batch() {
    let ws = Workspace::new();
    let id = saved_tree_id(&ws, "tree_1");
    let tree = id.to_string();

    let first = ws.write("defects.json", DEFECTS);
    let saved = ws.run_json(&[
        "defects",
        "--tree",
        &tree,
        "--response",
        first.to_str().expect("utf-8 path"),
    ]);
    let saved = saved.as_array().expect("defects");
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["defect_type"], "crack");
    assert!(saved[0]["crop_path"].is_string());

    let second = ws.write(
        "defects2.json",
        r#"[{"label": "fungus", "confidence": 0.5, "x1": 0.0, "y1": 0.0, "x2": 0.3, "y2": 0.3},
            {"label": "bark damage", "confidence": 0.3, "x1": 0.2, "y1": 0.2, "x2": 0.4, "y2": 0.4}]"#,
    );
    ws.run_json(&[
        "defects",
        "--tree",
        &tree,
        "--response",
        second.to_str().expect("utf-8 path"),
    ]);

    let export = ws.run_json(&["export"]);
    assert_eq!(export["defect_count"], 2);
    let types: Vec<&str> = export["trees"][0]["defects"]
        .as_array()
        .expect("defects")
        .iter()
        .filter_map(|d| d["defect_type"].as_str())
        .collect();
    assert_eq!(types, ["fungus", "bark damage"]);
}

#[test]
fn malformed_defect_response_is_rejected() {
    let ws = Workspace::new();
    let id = saved_tree_id(&ws, "tree_1").to_string();
    let bad = ws.write("bad.json", r#"[{"label": "crack", "confidence": "high"}]"#);

    let output = ws.run(&[
        "defects",
        "--tree",
        &id,
        "--response",
        bad.to_str().expect("utf-8 path"),
    ]);
    assert!(!output.status.success());
}

#[test]
fn classify_and_edit_update_the_record() {
    let ws = Workspace::new();
    let id = saved_tree_id(&ws, "tree_1").to_string();
    let response = ws.write("species.json", r#"{"label": "Platanus x acerifolia", "confidence": 0.88}"#);

    let classified = ws.run_json(&[
        "classify",
        "--tree",
        &id,
        "--response",
        response.to_str().expect("utf-8 path"),
    ]);
    assert_eq!(classified["taxon"], "Platanus x acerifolia");

    let edited = ws.run_json(&[
        "edit",
        "--tree",
        &id,
        "--description",
        "multi-stem, near lamp post",
        "--add-image",
        "bark.jpg",
        "--add-image",
        "crown.jpg",
    ]);
    assert_eq!(edited["description"], "multi-stem, near lamp post");
    assert_eq!(edited["auxiliary_images"][1], "crown.jpg");
    assert_eq!(edited["taxon"], "Platanus x acerifolia");
}

#[test]
fn delete_cascades_and_reports_missing_tree() {
    let ws = Workspace::new();
    let id = saved_tree_id(&ws, "tree_1").to_string();
    let defects = ws.write("defects.json", DEFECTS);
    ws.run_json(&[
        "defects",
        "--tree",
        &id,
        "--response",
        defects.to_str().expect("utf-8 path"),
    ]);

    assert_success(&ws.run(&["delete", "--tree", &id]));
    let export = ws.run_json(&["export"]);
    assert_eq!(export["tree_count"], 0);
    assert_eq!(export["defect_count"], 0);

    let again = ws.run(&["delete", "--tree", &id]);
    assert!(!again.status.success());
}

#[test]
fn detect_with_model_when_available() {
    let Some(model) = find_model_path() else {
        eprintln!("Skipping test: model not found");
        return;
    };
    let ws = Workspace::new();
    let photo = ws.photo("street.png", 640, 480);

    let report = ws.run_json(&[
        "detect",
        "--input",
        photo.to_str().expect("utf-8 path"),
        "--model",
        model.to_str().expect("utf-8 path"),
    ]);
    let detections = report[0]["detections"].as_array().expect("detections");
    for (i, detection) in detections.iter().enumerate() {
        assert_eq!(detection["identifier"], format!("tree_{}", i + 1));
    }
}
