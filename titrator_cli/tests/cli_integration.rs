use assert_cmd::Command;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

// Minimal valid TOML config for sim mode, with a fast measurement profile
// and a store path inside the temp dir.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let store_path = dir.path().join("readings.bin");
    let toml = format!(
        r#"
[dosers.fill]
ml_per_rotation = 1.0

[dosers.drain]
ml_per_rotation = 1.0

[dosers.reagent]
ml_per_rotation = 1.0

[ph]
read_interval_ms = 1
raw_window = 2
calibrated_window = 2

[titration]
ph_sample_count = 2
incremental_reagent_dose_volume_ml = 0.5

[measurement]
step_interval_ms = 1
stall_timeout_ms = 60000

[store]
capacity = 8
path = "{}"
"#,
        store_path.display()
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn titrator() -> Command {
    Command::cargo_bin("titrator").unwrap()
}

#[test]
fn help_shows_usage() {
    titrator()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn self_check_passes_in_sim_mode() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    titrator()
        .args(["--config", cfg.to_str().unwrap(), "self-check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("self-check ok"));
}

#[test]
fn self_check_json_is_parseable() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let output = titrator()
        .args(["--config", cfg.to_str().unwrap(), "--json", "self-check"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with('{'))
        .expect("a JSON line");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["status"], "ok");
    assert!(v["ph"].is_number());
}

#[test]
fn readings_on_fresh_store_reports_empty() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    titrator()
        .args(["--config", cfg.to_str().unwrap(), "readings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no readings stored"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[dosers.fill]\nml_per_rotation = 0.0\n").unwrap();
    titrator()
        .args(["--config", path.to_str().unwrap(), "self-check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ml_per_rotation"));
}

#[rstest]
#[case::dose(&["dose", "--role", "mystery", "--ml", "1.0"])]
#[case::dose_typo(&["dose", "--role", "fil", "--ml", "1.0"])]
#[case::rotate(&["rotate", "--role", "mystery", "--degrees", "90"])]
fn unknown_role_is_rejected(#[case] args: &[&str]) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    titrator()
        .args(["--config", cfg.to_str().unwrap()])
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no doser registered"));
}

#[test]
fn dose_moves_volume_in_sim_mode() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    titrator()
        .args([
            "--config",
            cfg.to_str().unwrap(),
            "dose",
            "--role",
            "reagent",
            "--ml",
            "0.5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("dispensed 0.5 ml through reagent"));
}

#[test]
fn ph_prints_requested_samples() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let output = titrator()
        .args([
            "--config",
            cfg.to_str().unwrap(),
            "ph",
            "--samples",
            "3",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.lines().filter(|l| l.starts_with("pH ")).count(), 3);
}

#[test]
fn measure_completes_and_persists_a_reading() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    titrator()
        .args([
            "--config",
            cfg.to_str().unwrap(),
            "measure",
            "--title",
            "sim-run",
        ])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("measurement complete"));

    titrator()
        .args(["--config", cfg.to_str().unwrap(), "readings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sim-run"));
}
