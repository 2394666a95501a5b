//! Integration tests for the command-line interface.

#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const VALID: &str = r#"
[detectors.det_door]
mode = "BINARY"
confidence_threshold = 0.85

[detectors.det_pets]
mode = "MULTICLASS"
class_names = ["cat", "dog"]
edge_inference_profile = "aggressive"
"#;

const INVALID: &str = r#"
[detectors.det_door]
mode = "BINARY"

[detectors.det_count]
mode = "MULTICLASS"
class_names = ["only_one"]
"#;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn edgelens(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("edgelens");
    cmd.arg("--config").arg(config).arg("-q");
    cmd
}

#[test]
fn test_detectors_check_passes_for_valid_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, VALID);

    edgelens(&config)
        .args(["detectors", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok       det_door"))
        .stdout(predicate::str::contains("All 2 detector(s) valid."));
}

#[test]
fn test_detectors_check_fails_for_invalid_detector() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, INVALID);

    edgelens(&config)
        .args(["detectors", "check"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid  det_count"))
        .stdout(predicate::str::contains("at least 2"))
        .stderr(predicate::str::contains("1 of 2 detector(s) are invalid"));
}

#[test]
fn test_detectors_list_shows_mode_and_profile() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, VALID);

    edgelens(&config)
        .args(["detectors", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("det_pets: MULTICLASS"))
        .stdout(predicate::str::contains("profile=aggressive"));
}

#[test]
fn test_config_init_then_path() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    edgelens(&config)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));
    assert!(config.exists());

    edgelens(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_unparseable_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[detectors.det_door\nmode = ");

    edgelens(&config)
        .args(["detectors", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config file"));
}

#[test]
fn test_query_with_missing_image_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, VALID);

    edgelens(&config)
        .args(["query", "det_door"])
        .arg(dir.path().join("missing.jpg"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read image"));
}
