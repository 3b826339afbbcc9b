use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn run_studio_cli(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_lottie-studio"))
        .current_dir(cwd)
        .env("RUST_LOG", "error")
        .args(args)
        .output()
        .expect("lottie-studio command should run")
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|error| {
        panic!(
            "stdout should be json ({error}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn inspect_json_lists_text_layers_in_document_order() {
    let dir = tempdir().expect("tempdir should create");
    let banner = fixture("text_banner.json");

    let first = run_studio_cli(dir.path(), &["inspect", banner.to_str().unwrap(), "--json"]);
    assert!(first.status.success(), "inspect --json should succeed");
    let second = run_studio_cli(dir.path(), &["inspect", banner.to_str().unwrap(), "--json"]);
    assert_eq!(first.stdout, second.stdout, "json output should be stable");

    let report = stdout_json(&first);
    assert_eq!(report["ok"], true);
    assert_eq!(report["version"], "5.7.4");
    assert_eq!(report["frame_rate"], 30.0);
    assert_eq!(report["total_frames"], 60.0);
    assert_eq!(report["layers"], 3);

    let layers = report["text_layers"].as_array().expect("text_layers should be array");
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0]["choice"], 0);
    assert_eq!(layers[0]["name"], "headline");
    assert_eq!(layers[0]["text"], "Summer Sale");
    assert_eq!(layers[1]["layer_index"], 1);
    assert_eq!(layers[1]["text"], "Up to 50% off");
}

#[test]
fn edit_writes_modified_document_and_keeps_the_rest() {
    let dir = tempdir().expect("tempdir should create");
    let banner = fixture("text_banner.json");

    let output = run_studio_cli(
        dir.path(),
        &[
            "edit",
            banner.to_str().unwrap(),
            "--text",
            "0=Winter Sale",
            "--color",
            "1=#ff8000",
            "-o",
            "edited.json",
        ],
    );
    assert!(
        output.status.success(),
        "edit should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let edited: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("edited.json")).unwrap())
            .expect("edited file should be json");
    let original: Value =
        serde_json::from_str(&fs::read_to_string(&banner).unwrap()).unwrap();

    let headline = &edited["layers"][0]["t"]["d"]["k"][0]["s"];
    assert_eq!(headline["t"], "Winter Sale");
    assert_eq!(headline["s"], original["layers"][0]["t"]["d"]["k"][0]["s"]["s"]);
    let subtitle = &edited["layers"][1]["t"]["d"]["k"][0]["s"];
    assert_eq!(subtitle["fc"], serde_json::json!([1.0, 0.502, 0.0]));
    assert_eq!(edited["layers"][2], original["layers"][2]);
    assert_eq!(edited["fonts"], original["fonts"]);
}

#[test]
fn malformed_json_reports_an_error_envelope() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("broken.json"), "{\"v\": \"5.7.4\", \"layers\": [").unwrap();

    let output = run_studio_cli(dir.path(), &["inspect", "broken.json", "--json"]);
    assert!(!output.status.success(), "inspect should fail");

    let envelope = stdout_json(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "malformed_input");
    assert_eq!(envelope["error"]["category"], "malformed_input");
    assert!(envelope["error"]["message"]
        .as_str()
        .unwrap()
        .contains("broken.json"));
}

#[test]
fn document_without_layers_is_rejected() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("empty.json"),
        r#"{"v": "5.7.4", "fr": 30, "ip": 0, "op": 10, "w": 10, "h": 10}"#,
    )
    .unwrap();

    let output = run_studio_cli(dir.path(), &["inspect", "empty.json", "--json"]);
    assert!(!output.status.success());
    assert_eq!(stdout_json(&output)["error"]["code"], "missing_field");
}

#[test]
fn out_of_range_text_selection_fails_without_writing() {
    let dir = tempdir().expect("tempdir should create");
    let banner = fixture("text_banner.json");

    let output = run_studio_cli(
        dir.path(),
        &["edit", banner.to_str().unwrap(), "--text", "7=Nope", "-o", "edited.json"],
    );
    assert!(!output.status.success(), "edit should fail");
    assert!(String::from_utf8_lossy(&output.stderr).contains("out of range"));
    assert!(!dir.path().join("edited.json").exists());
}

#[test]
fn empty_replacement_text_is_refused() {
    let dir = tempdir().expect("tempdir should create");
    let banner = fixture("text_banner.json");

    let output = run_studio_cli(
        dir.path(),
        &["edit", banner.to_str().unwrap(), "--text", "0=", "-o", "edited.json"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("replacement text is empty"));
}
