mod common;

use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

use common::{ruled_image, write_png};

fn write_manifest(dir: &Path, captures: &[(&str, &str)]) -> std::path::PathBuf {
    let image = ruled_image(200, 240, &[40, 120, 200]);
    let entries = captures
        .iter()
        .map(|(id, text)| {
            let file = format!("{id}.png");
            write_png(&dir.join(&file), &image).expect("capture image should be written");
            serde_json::json!({ "id": id, "image": file, "text": text })
        })
        .collect::<Vec<_>>();
    let path = dir.join("manifest.json");
    std::fs::write(
        &path,
        serde_json::to_string_pretty(&serde_json::json!({ "captures": entries }))
            .expect("manifest should serialize"),
    )
    .expect("manifest should be written");
    path
}

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_roster-reconcile"))
}

#[test]
fn run_writes_report_and_exits_zero() {
    let dir = tempdir().expect("tempdir should be created");
    let manifest = write_manifest(
        dir.path(),
        &[
            ("cap-001", "x2 Hatsch K:1 X:10 Y:20 1,922,130\nNobs K:1 X:10 Y:40 880,500"),
            ("cap-002", "Nobs K:1 X:10 Y:40 880,500\nDragonSlayer K:1 X:10 Y:60 954,000"),
        ],
    );
    let output = dir.path().join("out").join("report.json");

    let status = cli()
        .args([
            "run",
            "-m",
            &manifest.to_string_lossy(),
            "-o",
            &output.to_string_lossy(),
        ])
        .status()
        .expect("CLI should run");
    assert_eq!(status.code(), Some(0));

    let report: Value = serde_json::from_str(
        &std::fs::read_to_string(&output).expect("report should be readable"),
    )
    .expect("report should be JSON");
    let identities = report["records"]
        .as_array()
        .expect("records should be a list")
        .iter()
        .map(|record| record["identity"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(identities, vec!["Hatsch", "Nobs", "DragonSlayer"]);
    assert_eq!(report["overlap"]["pair_overlaps"], serde_json::json!([1]));
}

#[test]
fn run_without_records_exits_two() {
    let dir = tempdir().expect("tempdir should be created");
    let manifest = write_manifest(dir.path(), &[("cap-001", "Members 40/50")]);
    let output = dir.path().join("report.json");

    let status = cli()
        .args([
            "run",
            "-m",
            &manifest.to_string_lossy(),
            "-o",
            &output.to_string_lossy(),
        ])
        .status()
        .expect("CLI should run");
    assert_eq!(status.code(), Some(2));
    assert!(output.exists());
}

#[test]
fn missing_manifest_exits_one() {
    let dir = tempdir().expect("tempdir should be created");
    let output = cli()
        .args([
            "run",
            "-m",
            &dir.path().join("absent.json").to_string_lossy(),
            "-o",
            &dir.path().join("report.json").to_string_lossy(),
        ])
        .output()
        .expect("CLI should run");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn registry_commands_persist_changes() {
    let dir = tempdir().expect("tempdir should be created");
    let path = dir.path().join("registry.json");
    let path_arg = path.to_string_lossy().to_string();

    let status = cli()
        .args(["registry", "-p", &path_arg, "add-correction", "H4tsch", "Hatsch"])
        .status()
        .expect("CLI should run");
    assert_eq!(status.code(), Some(0));

    let shown = cli()
        .args(["registry", "-p", &path_arg, "show"])
        .output()
        .expect("CLI should run");
    assert_eq!(shown.status.code(), Some(0));
    let registry: Value = serde_json::from_slice(&shown.stdout).expect("show should print JSON");
    assert_eq!(registry["canonical_names"], serde_json::json!(["Hatsch"]));
    assert_eq!(registry["corrections"]["H4tsch"], "Hatsch");

    let status = cli()
        .args(["registry", "-p", &path_arg, "add-name", "x"])
        .status()
        .expect("CLI should run");
    assert_eq!(status.code(), Some(1));
}
