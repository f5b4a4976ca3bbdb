/// Common test utilities for CLI integration tests
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn find_model_path() -> Option<PathBuf> {
    let candidates = vec![
        "models/tree_detection_640.onnx",
        "../models/tree_detection_640.onnx",
    ];
    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
}

/// Scratch workspace holding a photo, a database, and a crop directory.
pub struct Workspace {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a sky-and-trunk synthetic photo.
    pub fn photo(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(name);
        let mut img = RgbImage::from_pixel(width, height, Rgb([140, 185, 235]));
        for y in height / 3..height {
            for x in width / 4..width / 2 {
                img.put_pixel(x, y, Rgb([70, 50, 30]));
            }
        }
        img.save(&path).expect("save photo");
        path
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn crop_dir(&self) -> PathBuf {
        self.path("crops")
    }

    /// Run arbor-cli against this workspace's database and crop directory.
    pub fn run(&self, args: &[&str]) -> Output {
        let database = self.path("arbor.db");
        let crops = self.crop_dir();
        Command::new(env!("CARGO_BIN_EXE_arbor-cli"))
            .current_dir(self.dir.path())
            .arg("--database")
            .arg(&database)
            .arg("--crop-dir")
            .arg(&crops)
            .args(args)
            .output()
            .expect("execute CLI")
    }

    /// Run and parse stdout as JSON, failing the test with stderr on error.
    pub fn run_json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(args);
        assert_success(&output);
        serde_json::from_slice(&output.stdout).expect("stdout is JSON")
    }
}

pub fn assert_success(output: &Output) {
    if !output.status.success() {
        eprintln!("CLI stderr: {}", String::from_utf8_lossy(&output.stderr));
    }
    assert!(output.status.success(), "CLI should succeed");
}

#[allow(dead_code)]
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}
