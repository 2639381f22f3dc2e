//! Pipeline integration tests using synthetic images and a reduced checkpoint.
//!
//! Each test sets up an isolated working directory containing a
//! `.anemia-scan.toml` that points the CLI at a tiny randomly initialized
//! checkpoint, then drives the binary end to end.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::uninlined_format_args
)]

use anemia_scan_test_support::{tiny_vit_config, write_synthetic_weights, SyntheticImageBuilder};
use assert_cmd::Command;
use serde_json::Value;

/// Creates a working directory with a tiny checkpoint, a matching project
/// config, and the given synthetic images.
fn setup_workspace(
    quality_threshold: f32,
    images: Vec<(&str, image::DynamicImage)>,
) -> tempfile::TempDir {
    let temp_dir = tempfile::tempdir().unwrap();

    let cfg = tiny_vit_config();
    write_synthetic_weights(&cfg, temp_dir.path().join("tiny.safetensors")).unwrap();

    // Architecture overrides must match the synthesized checkpoint. The
    // default attention row (90) is out of range for a 4x4 patch grid, so
    // pick one that exists.
    let config = format!(
        r"
[model]
weights = 'tiny.safetensors'
image_size = {}
patch_size = {}
hidden_size = {}
layers = {}
heads = {}
intermediate_size = {}

[quality]
threshold = {quality_threshold}

[heatmap]
grid_index = 5
",
        cfg.image_size,
        cfg.patch_size,
        cfg.hidden_size,
        cfg.num_layers,
        cfg.num_heads,
        cfg.intermediate_size,
    );
    std::fs::write(temp_dir.path().join(".anemia-scan.toml"), config).unwrap();

    for (name, img) in images {
        img.save(temp_dir.path().join(name)).unwrap();
    }

    temp_dir
}

/// Parses non-empty stdout lines as JSON values.
fn parse_jsonl(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_zero_threshold_accepts_and_classifies() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    let temp_dir = setup_workspace(0.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path()).arg("eye.png");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(
        output.status.code(),
        Some(0),
        "threshold 0 accepts everything, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let records = parse_jsonl(&stdout);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record["status"].as_str(), Some("accepted"));
    assert!(record.get("rejection").is_none());

    let prediction = &record["prediction"];
    let label = prediction["label"].as_str().unwrap();
    assert!(label == "Anemia" || label == "No Anemia");

    // Percent-formatted probabilities over two classes
    let anemia = prediction["probabilities"]["anemia"].as_f64().unwrap();
    let no_anemia = prediction["probabilities"]["no_anemia"].as_f64().unwrap();
    assert!(
        (anemia + no_anemia - 100.0).abs() < 0.1,
        "probabilities should sum to ~100%, got {} + {}",
        anemia,
        no_anemia
    );

    // Gate ran, so the accepted record carries its scores
    let quality = &prediction["quality"];
    assert!(quality["confidence"].as_f64().unwrap() >= 0.0);
    assert!(quality["energy"].as_f64().is_some());
}

#[test]
fn test_max_threshold_rejects() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    let temp_dir = setup_workspace(1.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path()).arg("eye.png");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(
        output.status.code(),
        Some(1),
        "a rejected image should exit 1"
    );

    let records = parse_jsonl(&stdout);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record["status"].as_str(), Some("rejected"));
    assert!(record.get("prediction").is_none());

    let rejection = &record["rejection"];
    assert!(rejection["message"]
        .as_str()
        .unwrap()
        .contains("conjunctiva"));
    assert!(rejection["confidence"].as_f64().unwrap() < 100.0);
    assert!((rejection["threshold"].as_f64().unwrap() - 100.0).abs() < 0.1);
}

#[test]
fn test_no_quality_check_overrides_rejection() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    let temp_dir = setup_workspace(1.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("--no-quality-check")
        .arg("eye.png");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(
        output.status.code(),
        Some(0),
        "disabling the gate skips rejection entirely"
    );

    let records = parse_jsonl(&stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"].as_str(), Some("accepted"));
    // Gate did not run, so no quality scores are attached
    assert!(records[0]["prediction"].get("quality").is_none());
}

#[test]
fn test_cli_threshold_overrides_config() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    // Config says reject everything; the flag wins.
    let temp_dir = setup_workspace(1.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("--quality-threshold")
        .arg("0.0")
        .arg("eye.png");

    cmd.assert().code(0);
}

#[test]
fn test_heatmap_written_for_accepted_image() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 48);
    let temp_dir = setup_workspace(0.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("--heatmap-dir")
        .arg("heatmaps")
        .arg("eye.png");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0));

    let heatmap_path = temp_dir.path().join("heatmaps").join("eye_heatmap.png");
    assert!(heatmap_path.exists(), "heatmap PNG should be written");

    // Side-by-side composite: original plus rescaled overlay, same height
    let composite = image::open(&heatmap_path).unwrap();
    assert_eq!(composite.height(), 48);
    assert!(composite.width() > 64);

    let records = parse_jsonl(&stdout);
    let recorded = records[0]["heatmap_path"].as_str().unwrap();
    assert!(recorded.ends_with("eye_heatmap.png"));
}

#[test]
fn test_no_heatmap_for_rejected_image() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    let temp_dir = setup_workspace(1.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("--heatmap-dir")
        .arg("heatmaps")
        .arg("eye.png");

    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let heatmap_path = temp_dir.path().join("heatmaps").join("eye_heatmap.png");
    assert!(
        !heatmap_path.exists(),
        "rejected images get no heatmap rendering"
    );
}

#[test]
fn test_multiple_images_one_record_each() {
    let healthy = SyntheticImageBuilder::conjunctiva(64, 64);
    let pale = SyntheticImageBuilder::pale_conjunctiva(64, 64);
    let noise = SyntheticImageBuilder::noise(64, 64, 42);

    let temp_dir = setup_workspace(
        0.0,
        vec![
            ("healthy.png", healthy.image.clone()),
            ("pale.png", pale.image.clone()),
            ("noise.png", noise.image.clone()),
        ],
    );

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path()).arg(".");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    let records = parse_jsonl(&stdout);
    assert_eq!(records.len(), 3, "one record per image");

    for record in &records {
        assert!(record.get("path").is_some());
        assert!(record.get("timestamp").is_some());
        assert!(record.get("status").is_some());
    }
}

#[test]
fn test_json_array_format() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    let temp_dir = setup_workspace(0.0, vec![("eye.png", eye.image.clone())]);

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("--format")
        .arg("json")
        .arg("eye.png");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0));

    let parsed: Value = serde_json::from_str(stdout.trim()).unwrap();
    let records = parsed.as_array().expect("json format emits an array");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"].as_str(), Some("accepted"));
}

#[test]
fn test_unreadable_image_is_skipped() {
    let eye = SyntheticImageBuilder::conjunctiva(64, 64);
    let temp_dir = setup_workspace(0.0, vec![("eye.png", eye.image.clone())]);
    std::fs::write(temp_dir.path().join("broken.png"), b"not a png").unwrap();

    let mut cmd = Command::cargo_bin("anemia-scan").unwrap();
    cmd.current_dir(temp_dir.path()).arg(".");

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    // The bad file is skipped, the good one still screens
    assert_eq!(output.status.code(), Some(0));
    let records = parse_jsonl(&stdout);
    assert_eq!(records.len(), 1);
}
